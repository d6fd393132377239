//! Vote ledger view and aggregation
//!
//! The authoritative ledger is the votes table; this is the in-memory
//! view a session writer works against. Tallies are pure derivations
//! recomputed from the votes on every read, never cached, so they cannot
//! diverge from the ledger.

use slothboard_common::model::VoteTally;
use slothboard_common::{Vote, VoterIdentity};

/// Immutable view over one session's votes
#[derive(Debug, Clone, Default)]
pub struct VoteLedger {
    votes: Vec<Vote>,
}

impl VoteLedger {
    pub fn new(votes: Vec<Vote>) -> Self {
        Self { votes }
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Whether this identity already has a vote on record
    pub fn contains(&self, identity: &VoterIdentity) -> bool {
        let key = identity.voter_key();
        self.votes.iter().any(|v| v.voter.voter_key() == key)
    }

    /// Voter identities in cast order (presence list; values not exposed)
    pub fn voters(&self) -> Vec<VoterIdentity> {
        self.votes.iter().map(|v| v.voter.clone()).collect()
    }

    /// Compute the derived tally from the current votes
    pub fn tally(&self) -> VoteTally {
        let values: Vec<u32> = self.votes.iter().map(|v| v.value).collect();
        VoteTally::compute(&values)
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn into_votes(self) -> Vec<Vote> {
        self.votes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use slothboard_common::model::{Avatar, Role};
    use uuid::Uuid;

    fn vote(session_id: Uuid, voter: VoterIdentity, value: u32) -> Vote {
        Vote {
            session_id,
            voter,
            value,
            cast_at: Utc::now(),
        }
    }

    fn guest(name: &str) -> VoterIdentity {
        VoterIdentity::Guest {
            guest_id: Uuid::new_v4(),
            display_name: name.into(),
            avatar: Avatar::Default,
        }
    }

    fn member(name: &str) -> VoterIdentity {
        VoterIdentity::Member {
            member_id: Uuid::new_v4(),
            role: Role::Developer,
            display_name: name.into(),
        }
    }

    #[test]
    fn test_contains_matches_by_voter_key() {
        let sid = Uuid::new_v4();
        let g = guest("G1");
        let ledger = VoteLedger::new(vec![vote(sid, g.clone(), 5)]);

        assert!(ledger.contains(&g));
        assert!(!ledger.contains(&guest("G1"))); // same name, new identity
        assert!(!ledger.contains(&member("M")));
    }

    #[test]
    fn test_tally_from_mixed_identities() {
        let sid = Uuid::new_v4();
        let ledger = VoteLedger::new(vec![
            vote(sid, guest("G1"), 5),
            vote(sid, member("M2"), 8),
        ]);

        let tally = ledger.tally();
        assert_eq!(tally.count, 2);
        assert_eq!(tally.average, 6.5);
        assert!(!tally.consensus);
    }

    #[test]
    fn test_voters_preserve_cast_order() {
        let sid = Uuid::new_v4();
        let first = guest("first");
        let second = member("second");
        let ledger = VoteLedger::new(vec![
            vote(sid, first.clone(), 3),
            vote(sid, second.clone(), 3),
        ]);

        let voters = ledger.voters();
        assert_eq!(voters[0].voter_key(), first.voter_key());
        assert_eq!(voters[1].voter_key(), second.voter_key());
    }
}
