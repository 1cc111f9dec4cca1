//! What an NPC remembers about nearby fights.

use crate::game::state::ActorId;

/// Fights an NPC has seen, as `(attacker, target)` pairs in the order first
/// observed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CombatMemory {
    combats: Vec<(ActorId, ActorId)>,
}

impl CombatMemory {
    /// Remember that `attacker` hit `target`.
    pub fn observe_attack(&mut self, attacker: ActorId, target: ActorId) {
        if !self.combats.contains(&(attacker, target)) {
            self.combats.push((attacker, target));
        }
    }

    /// Whether the two actors have fought in either direction.
    pub fn has_attacked_each_other(&self, a: ActorId, b: ActorId) -> bool {
        self.combats.iter().any(|&pair| pair == (a, b) || pair == (b, a))
    }

    /// Forget every fight involving one of `actors`.
    pub fn forget_combatants(&mut self, actors: &[ActorId]) {
        if actors.is_empty() {
            return;
        }
        self.combats
            .retain(|(attacker, target)| !actors.contains(attacker) && !actors.contains(target));
    }

    /// Keep only fights where both sides satisfy `keep`.
    pub fn retain_combatants(&mut self, mut keep: impl FnMut(ActorId) -> bool) {
        self.combats.retain(|&(attacker, target)| keep(attacker) && keep(target));
    }

    /// Remembered fights.
    pub fn combats(&self) -> &[(ActorId, ActorId)] {
        &self.combats
    }

    /// Nothing remembered.
    pub fn is_empty(&self) -> bool {
        self.combats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_query() {
        let mut memory = CombatMemory::default();
        memory.observe_attack(1, 2);
        memory.observe_attack(1, 2);
        memory.observe_attack(3, 4);
        assert_eq!(memory.combats(), &[(1, 2), (3, 4)]);
        assert!(memory.has_attacked_each_other(2, 1));
        assert!(!memory.has_attacked_each_other(1, 3));
    }

    #[test]
    fn test_forget() {
        let mut memory = CombatMemory::default();
        memory.observe_attack(1, 2);
        memory.observe_attack(3, 4);
        memory.forget_combatants(&[2]);
        assert_eq!(memory.combats(), &[(3, 4)]);
        memory.retain_combatants(|id| id != 4);
        assert!(memory.is_empty());
    }
}
