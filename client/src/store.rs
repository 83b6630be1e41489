//! Client-side copy of the server's participant and asset-set state

use log::debug;
use shared::{AssetSet, Participant, ParticipantId, ParticipantUpdate};
use std::collections::{BTreeMap, HashMap};

/// Participants and asset sets as last asserted by the server.
///
/// Participants are kept ordered by id so roster rendering is stable between
/// frames regardless of the order updates arrived in.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    participants: BTreeMap<ParticipantId, Participant>,
    asset_sets: HashMap<String, AssetSet>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_participant(&mut self, participant: Participant) {
        self.participants
            .insert(participant.id.clone(), participant);
    }

    pub fn remove_participant(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Applies partial updates to known participants and returns how many
    /// were applied. Updates for unknown ids are dropped.
    pub fn merge_positions<'a, I>(&mut self, updates: I) -> usize
    where
        I: IntoIterator<Item = (&'a ParticipantId, &'a ParticipantUpdate)>,
    {
        let mut applied = 0;
        for (id, update) in updates {
            match self.participants.get_mut(id) {
                Some(participant) => {
                    participant.apply(update);
                    applied += 1;
                }
                None => debug!("Dropping update for unknown participant {}", id),
            }
        }
        applied
    }

    pub fn register_asset_set(&mut self, name: impl Into<String>, asset_set: AssetSet) {
        self.asset_sets.insert(name.into(), asset_set);
    }

    /// Replaces the whole store with a join snapshot.
    pub fn load_snapshot<P, A>(&mut self, participants: P, asset_sets: A)
    where
        P: IntoIterator<Item = Participant>,
        A: IntoIterator<Item = (String, AssetSet)>,
    {
        self.participants = participants
            .into_iter()
            .map(|participant| (participant.id.clone(), participant))
            .collect();
        self.asset_sets = asset_sets.into_iter().collect();
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.asset_sets.clear();
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn asset_set(&self, name: &str) -> Option<&AssetSet> {
        self.asset_sets.get(name)
    }

    pub fn asset_set_count(&self) -> usize {
        self.asset_sets.len()
    }

    /// Image reference for the participant's current facing and animation
    /// frame, if its asset set defines one.
    pub fn sprite_frame(&self, participant: &Participant) -> Option<&str> {
        self.asset_set(&participant.avatar)?
            .frame(participant.facing, participant.animation_frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use shared::Direction;
    use std::collections::{BTreeMap, HashSet};

    fn knight() -> AssetSet {
        let mut frames = BTreeMap::new();
        frames.insert(
            Direction::Down,
            vec!["down-0".to_string(), "down-1".to_string()],
        );
        frames.insert(Direction::Up, vec!["up-0".to_string()]);
        AssetSet {
            name: "knight".to_string(),
            frames,
        }
    }

    fn update_x(x: f32) -> ParticipantUpdate {
        ParticipantUpdate {
            x: Some(x),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut store = EntityStore::new();
        store.upsert_participant(Participant::new("a", "ada", 1.0, 2.0));
        store.upsert_participant(Participant::new("a", "ada", 3.0, 4.0));

        assert_eq!(store.len(), 1);
        assert_approx_eq!(store.participant(&"a".into()).unwrap().x, 3.0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut store = EntityStore::new();
        store.upsert_participant(Participant::new("a", "ada", 0.0, 0.0));

        assert!(store.remove_participant(&"zzz".into()).is_none());
        assert_eq!(store.len(), 1);
        assert!(store.remove_participant(&"a".into()).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_merge_positions_ignores_unknown_ids() {
        let mut store = EntityStore::new();
        store.upsert_participant(Participant::new("a", "ada", 0.0, 0.0));

        let mut updates = HashMap::new();
        updates.insert(ParticipantId::new("a"), update_x(50.0));
        updates.insert(ParticipantId::new("ghost"), update_x(99.0));

        assert_eq!(store.merge_positions(&updates), 1);
        assert_eq!(store.len(), 1);
        assert!(!store.contains(&"ghost".into()));
        assert_approx_eq!(store.participant(&"a".into()).unwrap().x, 50.0);
    }

    #[test]
    fn test_register_asset_set_replaces_fully() {
        let mut store = EntityStore::new();
        store.register_asset_set("knight", knight());
        store.register_asset_set(
            "knight",
            AssetSet {
                name: "knight".to_string(),
                frames: BTreeMap::new(),
            },
        );

        assert_eq!(store.asset_set_count(), 1);
        assert!(store.asset_set("knight").unwrap().frames.is_empty());
    }

    #[test]
    fn test_load_snapshot_replaces_contents() {
        let mut store = EntityStore::new();
        store.upsert_participant(Participant::new("stale", "old", 0.0, 0.0));
        store.register_asset_set("old", AssetSet::default());

        store.load_snapshot(
            vec![
                Participant::new("b", "bob", 1.0, 1.0),
                Participant::new("a", "ada", 2.0, 2.0),
            ],
            vec![("knight".to_string(), knight())],
        );

        assert!(!store.contains(&"stale".into()));
        assert!(store.asset_set("old").is_none());
        let ids: Vec<&str> = store.participants().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_sprite_frame_resolution() {
        let mut store = EntityStore::new();
        store.register_asset_set("knight", knight());

        let mut player = Participant::new("a", "ada", 0.0, 0.0);
        player.avatar = "knight".to_string();
        player.animation_frame = 1;
        assert_eq!(store.sprite_frame(&player), Some("down-1"));

        player.facing = Direction::Left;
        assert_eq!(store.sprite_frame(&player), None);

        player.facing = Direction::Up;
        player.animation_frame = 3;
        assert_eq!(store.sprite_frame(&player), None);

        player.avatar = "missing".to_string();
        player.animation_frame = 0;
        assert_eq!(store.sprite_frame(&player), None);
    }

    #[test]
    fn test_random_operation_sequences_track_membership() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut store = EntityStore::new();
        let mut expected: HashSet<String> = HashSet::new();

        for _ in 0..5_000 {
            let id = format!("p{}", rng.gen_range(0..20));
            match rng.gen_range(0..3) {
                0 => {
                    store.upsert_participant(Participant::new(id.as_str(), "x", 0.0, 0.0));
                    expected.insert(id.clone());
                }
                1 => {
                    store.remove_participant(&ParticipantId::new(id.as_str()));
                    expected.remove(&id);
                }
                _ => {
                    let mut updates = HashMap::new();
                    updates.insert(ParticipantId::new(id.as_str()), update_x(rng.gen()));
                    store.merge_positions(&updates);
                }
            }

            assert_eq!(store.len(), expected.len());
            assert_eq!(store.contains(&ParticipantId::new(id.as_str())), expected.contains(&id));
        }
    }
}
