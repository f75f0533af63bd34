//! Logical time.
//!
//! # Time Ticket
//!
//! Every mutation is stamped with a `TimeTicket`: a lamport counter, a
//! delimiter that separates tickets issued within the same change, and the
//! id of the issuing actor. Tickets are totally ordered by lamport, then
//! delimiter, then actor id, so two replicas that observe the same tickets
//! always agree on which came "after".
//!
//! Issuing tickets that are strictly greater than anything the replica has
//! produced or observed is the caller's job; `LogicalClock` is a small
//! helper that does exactly that.
//!
//! Complexity:
//! - compare: O(1)
//! - issue: O(1)
//! - observe: O(1)

use std::cmp::Ordering;

use rustc_hash::FxHashMap;

use crate::actor::ActorId;

/// Largest lamport value a ticket may carry.
pub const MAX_LAMPORT: u64 = u64::MAX;

/// Largest delimiter a ticket may carry.
pub const MAX_DELIMITER: u32 = u32::MAX;

/// A logical timestamp: (lamport, delimiter, actor).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeTicket {
    lamport: u64,
    delimiter: u32,
    actor: ActorId,
}

impl TimeTicket {
    /// The smallest ticket. Nothing happens before it.
    pub const INITIAL: TimeTicket = TimeTicket {
        lamport: 0,
        delimiter: 0,
        actor: ActorId::INITIAL,
    };

    /// The largest ticket. Everything happens before it.
    pub const MAX: TimeTicket = TimeTicket {
        lamport: MAX_LAMPORT,
        delimiter: MAX_DELIMITER,
        actor: ActorId::MAX,
    };

    /// Create a ticket from its parts.
    pub const fn new(lamport: u64, delimiter: u32, actor: ActorId) -> TimeTicket {
        return TimeTicket { lamport, delimiter, actor };
    }

    #[inline]
    pub fn lamport(&self) -> u64 {
        return self.lamport;
    }

    #[inline]
    pub fn delimiter(&self) -> u32 {
        return self.delimiter;
    }

    #[inline]
    pub fn actor(&self) -> ActorId {
        return self.actor;
    }

    /// True if this ticket is strictly later than `other`.
    #[inline]
    pub fn after(&self, other: &TimeTicket) -> bool {
        return self > other;
    }

    /// A ticket sharing this one's lamport and actor with a new delimiter.
    pub fn with_delimiter(&self, delimiter: u32) -> TimeTicket {
        return TimeTicket {
            lamport: self.lamport,
            delimiter,
            actor: self.actor,
        };
    }
}

impl PartialOrd for TimeTicket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl Ord for TimeTicket {
    fn cmp(&self, other: &Self) -> Ordering {
        return self
            .lamport
            .cmp(&other.lamport)
            .then(self.delimiter.cmp(&other.delimiter))
            .then(self.actor.cmp(&other.actor));
    }
}

impl std::fmt::Debug for TimeTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "TimeTicket({}:{}:{})", self.lamport, self.actor, self.delimiter);
    }
}

impl std::fmt::Display for TimeTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}:{}:{}", self.lamport, self.actor, self.delimiter);
    }
}

/// Per-actor latest creation time a replica had observed when it issued an
/// edit. Text and tree edits use it to avoid deleting or styling content the
/// editing replica never saw.
pub type CreatedAtMap = FxHashMap<ActorId, TimeTicket>;

/// Resolve the causal bound for nodes created by `actor`.
///
/// A local edit (`None`) has seen everything. A remote edit has seen only
/// what its map records; actors missing from the map were never observed.
pub fn latest_created_at(map: Option<&CreatedAtMap>, actor: &ActorId) -> TimeTicket {
    return match map {
        None => TimeTicket::MAX,
        Some(map) => map.get(actor).copied().unwrap_or(TimeTicket::INITIAL),
    };
}

/// Record `created_at` in `map` if it is the latest ticket seen for its actor.
pub fn record_created_at(map: &mut CreatedAtMap, created_at: TimeTicket) {
    let entry = map.entry(created_at.actor()).or_insert(created_at);
    if created_at.after(entry) {
        *entry = created_at;
    }
}

/// A lamport clock that issues tickets for one actor.
///
/// A change groups several tickets under one lamport value; each ticket in
/// the change gets the next delimiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogicalClock {
    lamport: u64,
    delimiter: u32,
    actor: ActorId,
}

impl LogicalClock {
    /// Create a clock for `actor` starting at lamport 0.
    pub fn new(actor: ActorId) -> LogicalClock {
        return LogicalClock { lamport: 0, delimiter: 0, actor };
    }

    #[inline]
    pub fn actor(&self) -> ActorId {
        return self.actor;
    }

    #[inline]
    pub fn lamport(&self) -> u64 {
        return self.lamport;
    }

    /// Start a new change: advance lamport and reset the delimiter.
    pub fn next_change(&mut self) {
        self.lamport += 1;
        self.delimiter = 0;
    }

    /// Issue the next ticket within the current change.
    pub fn issue(&mut self) -> TimeTicket {
        self.delimiter += 1;
        return TimeTicket::new(self.lamport, self.delimiter, self.actor);
    }

    /// Start a change and issue its first ticket.
    pub fn tick(&mut self) -> TimeTicket {
        self.next_change();
        return self.issue();
    }

    /// Observe a remote ticket so that later tickets, from `tick` or from
    /// `issue`, are greater than it.
    pub fn observe(&mut self, ticket: &TimeTicket) {
        if ticket.lamport() > self.lamport {
            self.lamport = ticket.lamport();
            self.delimiter = ticket.delimiter();
        } else if ticket.lamport() == self.lamport {
            self.delimiter = self.delimiter.max(ticket.delimiter());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(byte: u8) -> ActorId {
        return ActorId([byte; 12]);
    }

    #[test]
    fn order_by_lamport_first() {
        let a = TimeTicket::new(1, 9, actor(9));
        let b = TimeTicket::new(2, 0, actor(0));
        assert!(b.after(&a));
        assert!(!a.after(&b));
    }

    #[test]
    fn order_by_delimiter_then_actor() {
        let a = TimeTicket::new(3, 1, actor(9));
        let b = TimeTicket::new(3, 2, actor(0));
        assert!(b.after(&a));

        let c = TimeTicket::new(3, 2, actor(1));
        assert!(c.after(&b));
        assert!(!b.after(&b));
    }

    #[test]
    fn initial_and_max_bound_everything() {
        let t = TimeTicket::new(42, 7, actor(3));
        assert!(t.after(&TimeTicket::INITIAL));
        assert!(TimeTicket::MAX.after(&t));
    }

    #[test]
    fn clock_issues_increasing_tickets() {
        let mut clock = LogicalClock::new(actor(1));
        let a = clock.tick();
        let b = clock.issue();
        let c = clock.tick();
        assert!(b.after(&a));
        assert!(c.after(&b));
        assert_eq!(a.lamport(), 1);
        assert_eq!(b.delimiter(), 2);
        assert_eq!(c.lamport(), 2);
    }

    #[test]
    fn clock_observe_moves_past_remote() {
        let mut clock = LogicalClock::new(actor(1));
        clock.tick();
        clock.observe(&TimeTicket::new(10, 4, actor(2)));
        let next = clock.tick();
        assert_eq!(next.lamport(), 11);

        clock.observe(&TimeTicket::new(3, 0, actor(2)));
        assert_eq!(clock.lamport(), 11);
    }

    #[test]
    fn clock_issues_past_a_ticket_of_the_same_change() {
        let mut clock = LogicalClock::new(actor(1));
        let remote = TimeTicket::new(10, 4, actor(2));
        clock.observe(&remote);
        assert!(clock.issue().after(&remote));

        // Same lamport as the local change, later delimiter.
        let mut clock = LogicalClock::new(actor(3));
        let mine = clock.tick();
        let remote = TimeTicket::new(mine.lamport(), 7, actor(0));
        clock.observe(&remote);
        let next = clock.issue();
        assert!(next.after(&remote));
        assert_eq!(next.lamport(), mine.lamport());
    }

    #[test]
    fn latest_created_at_resolution() {
        let mut map = CreatedAtMap::default();
        let known = TimeTicket::new(5, 1, actor(2));
        record_created_at(&mut map, known);
        record_created_at(&mut map, TimeTicket::new(4, 1, actor(2)));

        assert_eq!(latest_created_at(None, &actor(2)), TimeTicket::MAX);
        assert_eq!(latest_created_at(Some(&map), &actor(2)), known);
        assert_eq!(latest_created_at(Some(&map), &actor(3)), TimeTicket::INITIAL);
    }
}
