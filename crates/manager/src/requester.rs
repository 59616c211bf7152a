use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The logical subsystem holding a deck open.
///
/// Requesters are not resources; they only classify openers for reference
/// counting and for deciding who wins a conflict. The "not tied to any
/// particular requester" case is modeled as `Option<Requester>::None` on
/// the release path (an unconditional close).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requester {
    /// The study screen: the one closers must not pull a deck out from
    /// under (see the closer's pre-step).
    #[display("study screen")]
    Study,
    #[display("deck picker")]
    DeckPicker,
    #[display("status widget")]
    StatusWidget,
    /// The home-screen learning widget; evicted when the sync client
    /// takes the deck.
    #[display("big widget")]
    BigWidget,
    #[display("statistics")]
    Statistics,
    /// Holds decks exclusively while a sync is active.
    #[display("sync client")]
    SyncClient,
    #[display("card editor")]
    CardEditor,
    #[display("download manager")]
    DownloadManager,
}

impl Requester {
    /// Whether this requester takes exclusive priority over a deck while
    /// it is an opener.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::SyncClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Requester::Study, false)]
    #[case(Requester::BigWidget, false)]
    #[case(Requester::SyncClient, true)]
    #[case(Requester::DownloadManager, false)]
    fn test_only_sync_is_exclusive(#[case] requester: Requester, #[case] exclusive: bool) {
        assert_eq!(requester.is_exclusive(), exclusive);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Requester::Study.to_string(), "study screen");
        assert_eq!(Requester::SyncClient.to_string(), "sync client");
    }
}
