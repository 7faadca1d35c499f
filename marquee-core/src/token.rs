use rand::Rng;
use uuid::Uuid;

/// Unguessable per-seat token printed into the ticket QR code.
pub fn new_qr_token() -> Uuid {
    Uuid::new_v4()
}

/// Numeric one-time code for e-mail verification.
pub fn verification_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_qr_tokens_do_not_repeat() {
        let tokens: HashSet<Uuid> = (0..1000).map(|_| new_qr_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_verification_code_is_numeric() {
        let code = verification_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
