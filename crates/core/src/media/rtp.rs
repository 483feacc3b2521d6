use rand::RngExt;

/// Inclusive range of second-octet values that mark an RTCP packet when
/// RTP and RTCP share one port (RFC 5761 §4).
///
/// ```text
///  0                   1
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |   RTP
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|    RC   |   PT=200..204 |   RTCP
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// RTCP packet types (SR=200, RR=201, SDES=202, BYE=203, APP=204) fall in
/// this range, and RTP payload types 64–95 are never assigned so that an
/// RTP octet `M|PT` can not land here.
pub const RTCP_PACKET_TYPES: std::ops::RangeInclusive<u8> = 192..=223;

/// Which downstream a datagram belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}

/// Classify a datagram received on a shared RTP/RTCP port.
///
/// Datagrams too short to carry a payload-type octet are treated as RTP.
pub fn classify(packet: &[u8]) -> PacketKind {
    match packet.get(1) {
        Some(pt) if RTCP_PACKET_TYPES.contains(pt) => PacketKind::Rtcp,
        _ => PacketKind::Rtp,
    }
}

/// Generate a random synchronization source identifier.
///
/// Per RFC 3550 §8.1, the SSRC should be chosen randomly to minimize
/// the probability of collisions between independent sessions.
pub fn generate_ssrc() -> u32 {
    rand::rng().random::<u32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(second_octet: u8, len: usize) -> Vec<u8> {
        let mut p = vec![0xA5; len];
        p[0] = 0x80;
        if len > 1 {
            p[1] = second_octet;
        }
        p
    }

    #[test]
    fn rtcp_range_boundaries() {
        assert_eq!(classify(&packet(191, 8)), PacketKind::Rtp);
        assert_eq!(classify(&packet(192, 8)), PacketKind::Rtcp);
        assert_eq!(classify(&packet(200, 8)), PacketKind::Rtcp);
        assert_eq!(classify(&packet(223, 8)), PacketKind::Rtcp);
        assert_eq!(classify(&packet(224, 8)), PacketKind::Rtp);
    }

    #[test]
    fn rtp_with_marker_bit_is_rtp() {
        // M=1, PT=110 (AAC-ELD return audio)
        assert_eq!(classify(&packet(0x80 | 110, 60)), PacketKind::Rtp);
        // M=0, PT=0 (PCMU)
        assert_eq!(classify(&packet(0, 60)), PacketKind::Rtp);
    }

    #[test]
    fn short_datagrams_are_rtp() {
        assert_eq!(classify(&[]), PacketKind::Rtp);
        assert_eq!(classify(&[0x80]), PacketKind::Rtp);
    }

    #[test]
    fn classification_ignores_length() {
        for len in [2usize, 12, 188, 564, 1500] {
            assert_eq!(classify(&packet(201, len)), PacketKind::Rtcp, "len {len}");
            assert_eq!(classify(&packet(96, len)), PacketKind::Rtp, "len {len}");
        }
    }

    #[test]
    fn random_ssrc_differs() {
        assert_ne!(generate_ssrc(), generate_ssrc());
    }
}
