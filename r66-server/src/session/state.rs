//! Session protocol states
//!
//! A session tracks two states: `local`, what this side has done, and
//! `network`, what the last packet from the partner announced. Every packet
//! moves one of them; the move must be an allowed transition and the pair
//! must stay compatible (neither side more than one phase ahead).

use std::fmt;

use r66_common::packet::Packet;

use crate::constants::ERR_UNEXPECTED_PACKET;
use crate::error::{R66Error, Result};

/// Protocol phase of one side of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Channel open, nothing exchanged yet
    Opened,
    Startup,
    Authent,
    /// Administrative command exchange
    ValidControl,
    Request,
    Data,
    EndTransfer,
    EndRequest,
    Closed,
    Error,
    Shutdown,
    Block,
}

impl SessionState {
    /// Position along the main path; administrative and terminal states
    /// share the slot after authentication
    fn order(self) -> u8 {
        match self {
            Self::Opened => 0,
            Self::Startup => 1,
            Self::Authent => 2,
            Self::ValidControl | Self::Request | Self::Shutdown | Self::Block => 3,
            Self::Data => 4,
            Self::EndTransfer => 5,
            Self::EndRequest => 6,
            Self::Closed | Self::Error => 7,
        }
    }

    fn in_transfer(self) -> bool {
        matches!(
            self,
            Self::Request | Self::Data | Self::EndTransfer | Self::EndRequest
        )
    }

    /// No packet moves a session out of these
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }

    /// State a received or sent packet leads to
    pub fn for_packet(packet: &Packet) -> Self {
        match packet {
            Packet::Startup(_) => Self::Startup,
            Packet::Authent(_) => Self::Authent,
            Packet::Control(_) => Self::ValidControl,
            Packet::Request(_) => Self::Request,
            Packet::Data(_) => Self::Data,
            Packet::EndTransfer(_) => Self::EndTransfer,
            Packet::EndRequest(_) => Self::EndRequest,
            Packet::Error(_) => Self::Error,
            Packet::Shutdown(_) => Self::Shutdown,
            Packet::BlockRequest(_) => Self::Block,
        }
    }

    /// Whether a side may move from `self` to `next`
    pub fn allows(self, next: Self) -> bool {
        use SessionState::*;
        if next == Error {
            return !self.is_terminal();
        }
        match self {
            Opened => next == Startup,
            Startup => next == Authent,
            Authent => matches!(next, Authent | ValidControl | Request | Shutdown | Block),
            ValidControl => matches!(next, ValidControl | Closed),
            // a restart at end of file goes straight to the end of transfer
            Request => matches!(next, Request | Data | EndTransfer),
            Data => matches!(next, Data | EndTransfer),
            EndTransfer => matches!(next, EndTransfer | EndRequest),
            EndRequest => matches!(next, EndRequest | Closed),
            Shutdown | Block => matches!(next, Shutdown | Block | Closed),
            Closed | Error => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Opened => "OPENED",
            Self::Startup => "STARTUP",
            Self::Authent => "AUTHENT",
            Self::ValidControl => "VALID",
            Self::Request => "REQUEST",
            Self::Data => "DATA",
            Self::EndTransfer => "ENDTRANSFER",
            Self::EndRequest => "ENDREQUEST",
            Self::Closed => "CLOSED",
            Self::Error => "ERROR",
            Self::Shutdown => "SHUTDOWN",
            Self::Block => "BLOCK",
        };
        f.write_str(name)
    }
}

/// Local and network state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatePair {
    pub local: SessionState,
    pub network: SessionState,
}

impl StatePair {
    pub fn new() -> Self {
        Self {
            local: SessionState::Opened,
            network: SessionState::Opened,
        }
    }

    /// Validate and apply a packet received from the partner
    ///
    /// # Errors
    ///
    /// Returns [`R66Error::Protocol`] if the packet is not allowed now.
    pub fn received(&mut self, packet: &Packet) -> Result<()> {
        let next = SessionState::for_packet(packet);
        if !self.network.allows(next) || !compatible(self.local, next) {
            return Err(R66Error::Protocol(format!(
                "{}{} (local {}, got {})",
                ERR_UNEXPECTED_PACKET,
                self.network,
                self.local,
                packet.name()
            )));
        }
        self.network = next;
        Ok(())
    }

    /// Validate and apply a packet this side is about to send
    ///
    /// # Errors
    ///
    /// Returns [`R66Error::Protocol`] if sending it now would break the
    /// protocol.
    pub fn sending(&mut self, packet: &Packet) -> Result<()> {
        self.enter(SessionState::for_packet(packet))
    }

    /// Move the local side without sending anything
    ///
    /// # Errors
    ///
    /// Returns [`R66Error::Protocol`] on a disallowed move.
    pub fn enter(&mut self, next: SessionState) -> Result<()> {
        if !self.local.allows(next) || !compatible(next, self.network) {
            return Err(R66Error::Protocol(format!(
                "cannot move from {} to {} (network {})",
                self.local, next, self.network
            )));
        }
        self.local = next;
        Ok(())
    }

    /// Close both sides
    pub fn close(&mut self) {
        if !self.local.is_terminal() {
            self.local = SessionState::Closed;
        }
        if !self.network.is_terminal() {
            self.network = SessionState::Closed;
        }
    }

    /// Mark the local side failed
    pub fn fail(&mut self) {
        self.local = SessionState::Error;
    }
}

impl Default for StatePair {
    fn default() -> Self {
        Self::new()
    }
}

/// At most one phase apart, unless either side is failing or closing
///
/// Within a transfer the sending side streams without hearing back, so any
/// two transfer phases are compatible; the data phase checks ranks itself.
fn compatible(a: SessionState, b: SessionState) -> bool {
    a.is_terminal()
        || b.is_terminal()
        || a.order().abs_diff(b.order()) <= 1
        || (a.in_transfer() && b.in_transfer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use r66_common::ErrorCode;
    use r66_common::packet::{
        AuthentPacket, DataPacket, EndTransferPacket, RequestPacket, StartupPacket, TransferMode,
        Way,
    };

    fn startup() -> Packet {
        Packet::Startup(StartupPacket {
            session_id: 1,
            tls: false,
        })
    }

    fn authent() -> Packet {
        Packet::Authent(AuthentPacket {
            host_id: "hostB".into(),
            key: String::new(),
            local_id: 1,
            way: Way::Ask,
            version: "3.1.0".into(),
        })
    }

    fn request(way: Way) -> Packet {
        Packet::Request(RequestPacket {
            rule: "r1".into(),
            mode: TransferMode::Send,
            filename: "a.txt".into(),
            block_size: 1024,
            rank: 0,
            special_id: 1,
            code: ErrorCode::InitOk,
            original_size: 10,
            file_info: String::new(),
            way,
        })
    }

    fn data(rank: u32) -> Packet {
        Packet::Data(DataPacket {
            rank,
            data: vec![1],
            digest: None,
        })
    }

    #[test]
    fn test_responder_happy_path() {
        let mut pair = StatePair::new();
        pair.received(&startup()).unwrap();
        pair.sending(&startup()).unwrap();
        pair.received(&authent()).unwrap();
        pair.sending(&authent()).unwrap();
        pair.received(&request(Way::Ask)).unwrap();
        pair.sending(&request(Way::Answer)).unwrap();
        pair.received(&data(0)).unwrap();
        pair.enter(SessionState::Data).unwrap();
        pair.received(&data(1)).unwrap();
        pair.received(&Packet::EndTransfer(EndTransferPacket {
            way: Way::Ask,
            digest: None,
            size: None,
        }))
        .unwrap();
        pair.enter(SessionState::EndTransfer).unwrap();
        pair.close();
        assert_eq!(pair.local, SessionState::Closed);
    }

    #[test]
    fn test_sender_streams_without_answers() {
        let mut pair = StatePair::new();
        pair.sending(&startup()).unwrap();
        pair.received(&startup()).unwrap();
        pair.sending(&authent()).unwrap();
        pair.received(&authent()).unwrap();
        pair.sending(&request(Way::Ask)).unwrap();
        pair.received(&request(Way::Answer)).unwrap();
        pair.sending(&data(0)).unwrap();
        pair.sending(&data(1)).unwrap();
        pair.enter(SessionState::EndTransfer).unwrap();
        pair.received(&Packet::EndTransfer(EndTransferPacket {
            way: Way::Answer,
            digest: None,
            size: None,
        }))
        .unwrap();
        pair.enter(SessionState::EndRequest).unwrap();
        assert_eq!(pair.network, SessionState::EndTransfer);
    }

    #[test]
    fn test_data_before_authent_is_rejected() {
        let mut pair = StatePair::new();
        pair.received(&startup()).unwrap();
        let err = pair.received(&data(0)).unwrap_err();
        assert!(matches!(err, R66Error::Protocol(_)));
        assert_eq!(pair.network, SessionState::Startup);
    }

    #[test]
    fn test_pair_must_stay_compatible() {
        let mut pair = StatePair::new();
        pair.received(&startup()).unwrap();
        // local still OPENED: authent from the network would put it two phases ahead
        assert!(pair.received(&authent()).is_err());
    }

    #[test]
    fn test_error_reachable_until_terminal() {
        let mut pair = StatePair::new();
        pair.received(&startup()).unwrap();
        pair.received(&Packet::error(ErrorCode::Shutdown, "bye", None))
            .unwrap();
        assert!(pair.received(&Packet::error(ErrorCode::Shutdown, "again", None)).is_err());
    }

    #[test]
    fn test_admin_states_from_authent_only() {
        assert!(SessionState::Authent.allows(SessionState::Shutdown));
        assert!(SessionState::Authent.allows(SessionState::Block));
        assert!(!SessionState::Request.allows(SessionState::Shutdown));
        assert!(!SessionState::Startup.allows(SessionState::ValidControl));
    }
}
