//! Canonicalization of client hardware addresses.

/// Render `chaddr` bytes (as carried in a DHCPv4 packet) as the
/// lowercase colon-separated form the Lease Spec stores them in.
pub fn canonical(chaddr: &[u8]) -> String {
    chaddr
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_lowercase_colon_form() {
        let mac = canonical(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        assert_eq!(mac, "aa:bb:cc:dd:ee:01");
    }
}
