//! The agent-dispatch contract.
//!
//! The host that produces reply texts is an external collaborator: given
//! an inbound message context, it returns a stream of reply fragments
//! tagged partial, block, or final. The core only consumes the stream,
//! interpreting the fragments through the evolving-reply rules.

use crate::identity::IdentityCode;
use crate::messaging::evolving::FragmentKind;
use crate::messaging::GroupRef;
use tokio::sync::mpsc;

/// One fragment of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFragment {
    /// How the fragment relates to the reply so far.
    pub kind: FragmentKind,
    /// The fragment text.
    pub text: String,
}

/// The inbound message handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct InboundContext {
    /// The message sender.
    pub sender: IdentityCode,
    /// The group conversation, if any.
    pub group: Option<GroupRef>,
    /// The sender-chosen message id.
    pub message_id: u64,
    /// The message text.
    pub text: String,
}

/// Produces reply streams for inbound messages.
pub trait AgentDispatcher: Send + Sync {
    /// Start a reply for the given context. The returned channel yields
    /// fragments until a `Final` fragment or channel close ends the
    /// reply.
    fn dispatch(&self, context: InboundContext) -> mpsc::Receiver<ReplyFragment>;
}
