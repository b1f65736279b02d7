use tokio::sync::watch;

/// Handle on an asynchronous engine call that has already been dispatched.
///
/// The call runs whether or not the ticket is awaited. Several tickets can
/// observe the same call (coalesced fetches hand out clones).
#[derive(Debug, Clone)]
pub struct Ticket<O> {
    rx: watch::Receiver<Option<O>>,
}

/// Producer side of a [`Ticket`].
#[derive(Debug)]
pub(crate) struct Completer<O> {
    tx: watch::Sender<Option<O>>,
}

pub(crate) fn ticket<O>() -> (Completer<O>, Ticket<O>) {
    let (tx, rx) = watch::channel(None);
    (Completer { tx }, Ticket { rx })
}

impl<O> Completer<O> {
    pub(crate) fn complete(self, outcome: O) {
        // send_replace stores the value even when every ticket was dropped
        self.tx.send_replace(Some(outcome));
    }
}

impl<O: Clone> Ticket<O> {
    /// A ticket that has already settled.
    pub fn ready(outcome: O) -> Self {
        let (completer, ticket) = ticket();
        completer.complete(outcome);
        ticket
    }

    /// Wait for the call to settle.
    ///
    /// `None` when the call was abandoned without an outcome.
    pub async fn settled(mut self) -> Option<O> {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome
    }

    /// The outcome if the call already settled.
    pub fn try_outcome(&self) -> Option<O> {
        self.rx.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ticket_settles_for_every_clone() {
        let (completer, ticket) = ticket::<u32>();
        let clone = ticket.clone();
        assert!(!ticket.is_settled());

        completer.complete(7);

        assert_eq!(ticket.settled().await, Some(7));
        assert_eq!(clone.try_outcome(), Some(7));
    }

    #[tokio::test]
    async fn test_abandoned_ticket_yields_none() {
        let (completer, ticket) = ticket::<u32>();
        drop(completer);
        assert_eq!(ticket.settled().await, None);
    }

    #[tokio::test]
    async fn test_ready_ticket() {
        assert_eq!(Ticket::ready("done").settled().await, Some("done"));
    }
}
