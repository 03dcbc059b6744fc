use std::fmt;

/// WhatsApp-style transport identity ("jid"), e.g. `6281234567890@s.whatsapp.net`
/// for a user or `<id>@g.us` for a group conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid(pub String);

impl Jid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
