//! Replicated membership of a growable collection.
//!
//! The collection topic carries the descriptors of every known entity; each
//! entity in turn owns a private sync primitive on `<collection>_<id>` for
//! its fine-grained state (position, scroll offsets, ...). Membership only
//! grows: applying a descriptor list materializes unknown ids and leaves
//! known ones untouched, so replaying any STATE is harmless.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::protocol::{Message, Topic};
use crate::runtime::Synchronized;
use crate::sync::{Outcome, Replica, SyncError, SyncPrimitive};
use crate::transport::Transport;

/// A member of a [`ReplicatedCollection`].
pub trait Entity: Replica + Sized {
    /// Coarse description sent on the collection topic.
    type Descriptor: Serialize + DeserializeOwned;

    fn id(&self) -> &str;

    fn describe(&self) -> Self::Descriptor;

    fn descriptor_id(descriptor: &Self::Descriptor) -> &str;

    /// Build a local instance from a remote peer's descriptor.
    fn materialize(descriptor: Self::Descriptor) -> Self;
}

/// Replica of the collection topic: the member table.
pub struct Roster<E: Entity> {
    topic: Topic,
    transport: Arc<dyn Transport>,
    members: IndexMap<String, SyncPrimitive<E>>,
}

impl<E: Entity> Roster<E> {
    fn new(topic: Topic, transport: Arc<dyn Transport>) -> Self {
        Self { topic, transport, members: IndexMap::new() }
    }

    /// Give `entity` its own primitive. Returns `false` if the id is known.
    fn adopt(&mut self, entity: E) -> Result<bool, SyncError> {
        if self.members.contains_key(entity.id()) {
            return Ok(false);
        }
        let id = entity.id().to_owned();
        let topic = self.topic.child(&id)?;
        let primitive = SyncPrimitive::new(topic, entity, self.transport.clone())?;
        self.members.insert(id, primitive);
        Ok(true)
    }
}

impl<E: Entity> Replica for Roster<E> {
    type State = Vec<E::Descriptor>;

    fn produce_state(&self) -> Vec<E::Descriptor> {
        self.members.values().map(|member| member.replica().describe()).collect()
    }

    fn apply_state(&mut self, descriptors: Vec<E::Descriptor>) {
        for descriptor in descriptors {
            if self.members.contains_key(E::descriptor_id(&descriptor)) {
                continue;
            }
            let entity = E::materialize(descriptor);
            let id = entity.id().to_owned();
            match self.adopt(entity) {
                Ok(_) => log::debug!("{}: materialized {id}", self.topic),
                Err(e) => log::warn!("{}: failed to materialize {id}: {e}", self.topic),
            }
        }
    }
}

/// A collection whose membership is replicated across peers.
pub struct ReplicatedCollection<E: Entity> {
    roster: SyncPrimitive<Roster<E>>,
}

impl<E: Entity> ReplicatedCollection<E> {
    pub fn new(topic: Topic, transport: Arc<dyn Transport>) -> Result<Self, SyncError> {
        let roster = Roster::new(topic.clone(), transport.clone());
        Ok(Self { roster: SyncPrimitive::new(topic, roster, transport)? })
    }

    /// Add a locally created entity and announce the new membership.
    ///
    /// Returns `false` without broadcasting if the id is already a member.
    /// While another peer holds the collection topic the announcement is
    /// suppressed; the next local creation carries it.
    pub fn create(&mut self, entity: E) -> Result<bool, SyncError> {
        if !self.roster.replica_mut().adopt(entity)? {
            return Ok(false);
        }
        self.roster.drive()?;
        self.roster.release()?;
        Ok(true)
    }

    pub fn topic(&self) -> &Topic {
        self.roster.topic()
    }

    /// Member ids in creation (or materialization) order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.roster.replica().members.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.roster.replica().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.replica().members.is_empty()
    }

    pub fn entity(&self, id: &str) -> Option<&SyncPrimitive<E>> {
        self.roster.replica().members.get(id)
    }

    pub fn entity_mut(&mut self, id: &str) -> Option<&mut SyncPrimitive<E>> {
        self.roster.replica_mut().members.get_mut(id)
    }

    /// Route a delivery to the collection topic or the matching entity.
    pub fn handle(&mut self, message: &Message) -> Outcome {
        if message.topic == *self.roster.topic() {
            return self.roster.handle(message);
        }
        let prefix = self.roster.topic().as_str();
        let id = message
            .topic
            .as_str()
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'));
        match id {
            Some(id) => match self.roster.replica_mut().members.get_mut(id) {
                Some(member) => member.handle(message),
                None => Outcome::Foreign,
            },
            None => Outcome::Foreign,
        }
    }
}

impl<E: Entity> Synchronized for ReplicatedCollection<E> {
    fn handle(&mut self, message: &Message) -> Outcome {
        ReplicatedCollection::handle(self, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerId;
    use crate::sync::tests::topic;
    use crate::transport::hub::LocalHub;
    use crate::transport::Inbox;
    use serde::Deserialize;

    #[derive(Debug)]
    struct Note {
        id: String,
        text: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct NoteDescriptor {
        id: String,
    }

    impl Replica for Note {
        type State = String;

        fn produce_state(&self) -> String {
            self.text.clone()
        }

        fn apply_state(&mut self, state: String) {
            self.text = state;
        }
    }

    impl Entity for Note {
        type Descriptor = NoteDescriptor;

        fn id(&self) -> &str {
            &self.id
        }

        fn describe(&self) -> NoteDescriptor {
            NoteDescriptor { id: self.id.clone() }
        }

        fn descriptor_id(descriptor: &NoteDescriptor) -> &str {
            &descriptor.id
        }

        fn materialize(descriptor: NoteDescriptor) -> Self {
            Self { id: descriptor.id, text: String::new() }
        }
    }

    fn note(id: &str) -> Note {
        Note { id: id.to_string(), text: String::new() }
    }

    struct Board {
        notes: ReplicatedCollection<Note>,
        inbox: Inbox,
    }

    fn board(hub: &LocalHub, id: u32) -> Board {
        let (endpoint, inbox) = hub.connect(PeerId(id));
        Board { notes: ReplicatedCollection::new(topic("notes"), endpoint).unwrap(), inbox }
    }

    fn settle(boards: &mut [&mut Board]) {
        loop {
            let mut any = false;
            for board in boards.iter_mut() {
                while let Ok(message) = board.inbox.try_recv() {
                    board.notes.handle(&message);
                    any = true;
                }
            }
            if !any {
                break;
            }
        }
    }

    #[test]
    fn test_create_materializes_remotely() {
        let hub = LocalHub::new();
        let mut a = board(&hub, 1);
        let mut b = board(&hub, 2);
        settle(&mut [&mut a, &mut b]);

        assert!(a.notes.create(note("n1")).unwrap());
        assert!(a.notes.create(note("n2")).unwrap());
        settle(&mut [&mut a, &mut b]);

        assert_eq!(b.notes.ids().collect::<Vec<_>>(), vec!["n1", "n2"]);
        assert_eq!(b.notes.entity("n1").unwrap().topic().as_str(), "notes_n1");
        assert_eq!(hub.subscriber_count(&topic("notes_n1")), 2);
    }

    #[test]
    fn test_entity_state_uses_private_topic() {
        let hub = LocalHub::new();
        let mut a = board(&hub, 1);
        let mut b = board(&hub, 2);
        a.notes.create(note("n1")).unwrap();
        settle(&mut [&mut a, &mut b]);

        let member = a.notes.entity_mut("n1").unwrap();
        member.replica_mut().text = "hello wall".to_string();
        member.drive().unwrap();
        member.release().unwrap();

        let before = b.notes.len();
        settle(&mut [&mut a, &mut b]);

        assert_eq!(b.notes.entity("n1").unwrap().replica().text, "hello wall");
        assert_eq!(b.notes.len(), before);
    }

    #[test]
    fn test_apply_is_idempotent_union() {
        let hub = LocalHub::new();
        let (endpoint, _inbox) = hub.connect(PeerId(1));
        let mut roster: Roster<Note> = Roster::new(topic("notes"), endpoint);
        roster.adopt(Note { id: "n1".into(), text: "mine".into() }).unwrap();

        let incoming = || vec![NoteDescriptor { id: "n1".into() }, NoteDescriptor { id: "n2".into() }];
        roster.apply_state(incoming());
        roster.apply_state(incoming());

        let ids: Vec<&str> = roster.members.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["n1", "n2"]);
        assert_eq!(roster.members["n1"].replica().text, "mine");

        // A shorter list never removes anything.
        roster.apply_state(Vec::new());
        assert_eq!(roster.members.len(), 2);
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let hub = LocalHub::new();
        let mut a = board(&hub, 1);
        assert!(a.notes.create(note("n1")).unwrap());
        assert!(!a.notes.create(note("n1")).unwrap());
        assert_eq!(a.notes.len(), 1);
    }

    #[test]
    fn test_late_joiner_gets_membership_and_entity_state() {
        let hub = LocalHub::new();
        let mut a = board(&hub, 1);
        a.notes.create(note("n1")).unwrap();
        let member = a.notes.entity_mut("n1").unwrap();
        member.replica_mut().text = "draft".to_string();
        member.drive().unwrap();
        member.release().unwrap();
        settle(&mut [&mut a]);

        let mut c = board(&hub, 3);
        settle(&mut [&mut a, &mut c]);

        assert_eq!(c.notes.ids().collect::<Vec<_>>(), vec!["n1"]);
        assert_eq!(c.notes.entity("n1").unwrap().replica().text, "draft");
    }

    #[test]
    fn test_foreign_topics() {
        let hub = LocalHub::new();
        let mut a = board(&hub, 1);
        let unknown_member = Message::lock(topic("notes_zz"), PeerId(2));
        let other = Message::lock(topic("notebook"), PeerId(2));
        assert_eq!(a.notes.handle(&unknown_member), Outcome::Foreign);
        assert_eq!(a.notes.handle(&other), Outcome::Foreign);
    }
}
