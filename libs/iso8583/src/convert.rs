//! Cross-dialect field copy and the one MTI normalization rule the
//! original gateway applied when handing a message from one side to the
//! other.

use crate::message::Message;

/// Copy every field from `msg` into a fresh message. Dialect conversion
/// is a no-op on the logical representation — [`Message`] never stores
/// wire bytes, only field values — so this exists to make the boundary
/// between terminal-side and host-side messages explicit at call sites
/// rather than to do any actual transcoding.
pub fn convert(msg: &Message) -> Message {
    msg.clone()
}

/// A `0430` (reversal advice repeat) arriving from the host is
/// renumbered to `0410` (reversal response) before it is handed back to
/// the terminal side. Terminals never see `0430`.
pub fn normalize_reversal_mti(msg: &mut Message) {
    if msg.mti() == "0430" {
        msg.set_mti("0410");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_preserves_fields() {
        let mut m = Message::new("0200");
        m.set(11, "000123").unwrap();
        let c = convert(&m);
        assert_eq!(c.get(11).unwrap(), "000123");
    }

    #[test]
    fn reversal_repeat_becomes_reversal_response() {
        let mut m = Message::new("0430");
        normalize_reversal_mti(&mut m);
        assert_eq!(m.mti(), "0410");
    }

    #[test]
    fn other_mtis_are_untouched() {
        let mut m = Message::new("0210");
        normalize_reversal_mti(&mut m);
        assert_eq!(m.mti(), "0210");
    }
}
