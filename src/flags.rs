use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// TCP control bits as they appear in byte 13 of the header (RFC 793, RFC 3168).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01; // no more data from sender
        const SYN = 0x02; // synchronize sequence numbers
        const RST = 0x04; // reset the connection
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
        const ECE = 0x40;
        const CWR = 0x80;
    }
}

impl TcpFlags {
    /// Flags that make a segment worth tracking even without payload.
    pub const INTERESTING: TcpFlags = TcpFlags::SYN.union(TcpFlags::FIN).union(TcpFlags::RST);

    /// Flags that close a half-stream.
    pub const CLOSING: TcpFlags = TcpFlags::FIN.union(TcpFlags::RST);

    pub fn is_syn(self) -> bool {
        self.contains(TcpFlags::SYN)
    }

    /// A SYN that is not a SYN-ACK, i.e. the opening segment of an active open.
    pub fn is_bare_syn(self) -> bool {
        self.contains(TcpFlags::SYN) && !self.contains(TcpFlags::ACK)
    }

    pub fn is_final(self) -> bool {
        self.intersects(TcpFlags::CLOSING)
    }

    pub fn is_interesting(self) -> bool {
        self.intersects(TcpFlags::INTERESTING)
    }
}

impl From<u8> for TcpFlags {
    fn from(raw: u8) -> Self {
        TcpFlags::from_bits_truncate(raw)
    }
}

/// Compact form used in log lines: `S`, `F`, `R`, `A` in that order.
impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, letter) in [
            (TcpFlags::SYN, 'S'),
            (TcpFlags::FIN, 'F'),
            (TcpFlags::RST, 'R'),
            (TcpFlags::ACK, 'A'),
        ] {
            if self.contains(flag) {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}
