//! # Worker Object Registry
//!
//! Owns every live remote object inside one worker. Built when the worker
//! starts and dropped when it stops; nothing outside the worker loop can reach
//! it.
//!
//! Identifiers come from a counter starting at 1 and are never reused, even
//! after the object they named is gone.

use std::collections::HashMap;

use crate::error::Failure;
use crate::id::ObjectId;

pub struct Registry<O> {
    objects: HashMap<ObjectId, O>,
    next_id: u64,
}

impl<O> Registry<O> {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
        }
    }

    /// Stores an object under a freshly minted identifier.
    pub fn insert(&mut self, object: O) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut O, Failure> {
        self.objects
            .get_mut(&id)
            .ok_or(Failure::UnknownIdentifier(id))
    }

    /// Removes an object, handing ownership to the caller.
    pub fn remove(&mut self, id: ObjectId) -> Result<O, Failure> {
        self.objects
            .remove(&id)
            .ok_or(Failure::UnknownIdentifier(id))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<O> Default for Registry<O> {
    fn default() -> Self {
        Self::new()
    }
}
