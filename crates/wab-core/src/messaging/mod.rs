pub mod port;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::{domain::Jid, Result};

    use super::port::TransportPort;

    /// Records every outbound send for assertions.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(Jid, String)>>,
    }

    impl RecordingTransport {
        pub fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TransportPort for RecordingTransport {
        async fn send_text(&self, to: &Jid, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.clone(), text.to_string()));
            Ok(())
        }
    }
}
