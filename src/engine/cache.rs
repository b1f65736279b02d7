//! In-flight bookkeeping for one list.
//!
//! Each dispatched request is tagged with a generation and the query it was
//! issued for. Only the newest generation may commit; anything older settles
//! as [`FetchOutcome::Stale`].

use crate::engine::ticket::{Completer, Ticket, ticket};
use crate::models::{FetchOutcome, Filter, QueryState};

#[derive(Debug)]
struct InFlight<F> {
    generation: u64,
    query: QueryState<F>,
    ticket: Ticket<FetchOutcome>,
}

/// Result of asking the cache whether a fetch should hit the network.
#[derive(Debug)]
pub(crate) enum Admission {
    /// An identical request is already in flight; wait on its ticket.
    Coalesced(Ticket<FetchOutcome>),
    /// Dispatch a new request under `generation`.
    Issue {
        generation: u64,
        completer: Completer<FetchOutcome>,
        ticket: Ticket<FetchOutcome>,
    },
}

#[derive(Debug)]
pub struct FetchCache<F> {
    generation: u64,
    in_flight: Option<InFlight<F>>,
}

impl<F> Default for FetchCache<F> {
    fn default() -> Self {
        Self {
            generation: 0,
            in_flight: None,
        }
    }
}

impl<F: Filter> FetchCache<F> {
    pub(crate) fn admit(&mut self, query: &QueryState<F>, no_cache: bool) -> Admission {
        if !no_cache {
            if let Some(in_flight) = &self.in_flight {
                if in_flight.query == *query {
                    return Admission::Coalesced(in_flight.ticket.clone());
                }
            }
        }

        self.generation += 1;
        let (completer, ticket) = ticket();
        self.in_flight = Some(InFlight {
            generation: self.generation,
            query: query.clone(),
            ticket: ticket.clone(),
        });

        Admission::Issue {
            generation: self.generation,
            completer,
            ticket,
        }
    }

    /// Close out `generation`. True when it is still the newest request and
    /// may commit.
    pub(crate) fn settle(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.in_flight = None;
        true
    }

    /// Orphan whatever is in flight; its response will be discarded.
    pub(crate) fn invalidate(&mut self) {
        self.generation += 1;
        self.in_flight = None;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight_query(&self) -> Option<&QueryState<F>> {
        self.in_flight.as_ref().map(|in_flight| &in_flight.query)
    }
}
