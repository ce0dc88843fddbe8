use earshot_world::Position;

use crate::NoPositionPolicy;

/// Whether a recipient at `recipient` hears a sender at `sender`.
///
/// Different worlds never hear each other. Exactly `range` away still
/// does. An unknown position on either side is decided by `policy`.
pub fn hears(
    sender: Option<&Position>,
    recipient: Option<&Position>,
    range: f64,
    policy: NoPositionPolicy,
) -> bool {
    match (sender, recipient) {
        (Some(s), Some(r)) => s.within_range(r, range),
        _ => policy == NoPositionPolicy::Broadcast,
    }
}
