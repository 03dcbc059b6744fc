use crate::domain::Jid;

/// The message-type variants a text body can be extracted from.
#[derive(Clone, Debug)]
pub enum MessageContent {
    /// Plain one-to-one conversation text.
    Conversation(String),
    /// Quoted/linked text ("extended text message").
    ExtendedText(String),
    /// Media with an optional caption.
    Media { caption: Option<String> },
    /// Anything else (reactions, protocol messages); carries no body.
    Other,
}

/// One inbound message envelope per transport event.
#[derive(Clone, Debug)]
pub struct MessageEnvelope {
    pub sender: Jid,
    /// Set in group contexts; identifies the actual author.
    pub participant: Option<Jid>,
    pub content: MessageContent,
}

impl MessageEnvelope {
    /// Plain-conversation convenience constructor.
    pub fn text(sender: Jid, body: impl Into<String>) -> Self {
        Self {
            sender,
            participant: None,
            content: MessageContent::Conversation(body.into()),
        }
    }

    /// The extractable text body, if any.
    pub fn body(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Conversation(s) => Some(s),
            MessageContent::ExtendedText(s) => Some(s),
            MessageContent::Media { caption } => caption.as_deref(),
            MessageContent::Other => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.content {
            MessageContent::Conversation(_) => "conversation",
            MessageContent::ExtendedText(_) => "extendedTextMessage",
            MessageContent::Media { .. } => "mediaMessage",
            MessageContent::Other => "other",
        }
    }

    /// The identity checked for privileged operations: the group participant
    /// when present, otherwise the conversation sender.
    pub fn requester(&self) -> &Jid {
        self.participant.as_ref().unwrap_or(&self.sender)
    }
}
