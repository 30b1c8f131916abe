//! computed answers for names under the `multiply` label
//!
//! A query for `3.5.multiply.<anything>` is answered locally instead of
//! being resolved: the labels in front of the marker are multiplied
//! modulo 256 and folded into the last octet of a loopback address.

use std::net::Ipv4Addr;

const MARKER_LABEL: &str = "multiply";

/// Compute the address for a name in the arithmetic zone, or `None` if
/// the name carries no `multiply` label or a non-numeric factor; such
/// names go through normal resolution.
pub fn evaluate(qname: &str) -> Option<Ipv4Addr> {
    let labels: Vec<&str> = qname.split('.').collect();
    let marker = labels.iter().position(|label| *label == MARKER_LABEL)?;

    let mut product: u64 = 1;
    for label in &labels[..marker] {
        let factor: u64 = label.parse().ok()?;
        product = (product * (factor % 256)) % 256;
    }

    Some(Ipv4Addr::new(127, 0, 0, product as u8))
}
