use super::*;
use axum::http::HeaderMap;

fn signed_headers(signature: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(SIGNATURE_HEADER, signature.parse().unwrap());
    headers
}

#[cfg(test)]
mod extract_bearer_token_tests {
    use super::*;

    fn with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", value.parse().unwrap());
        headers
    }

    #[test]
    fn valid_bearer_token() {
        let headers = with_auth("Bearer admin-secret");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "admin-secret");
    }

    #[test]
    fn case_insensitive_scheme_and_padding() {
        let headers = with_auth("bearer   admin-secret  ");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "admin-secret");
    }

    #[test]
    fn missing_authorization_header() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), Err(TokenError::Missing));
    }

    #[test]
    fn wrong_scheme_or_no_separator() {
        assert_eq!(
            extract_bearer_token(&with_auth("Basic dXNlcjpwYXNz")),
            Err(TokenError::InvalidFormat)
        );
        assert_eq!(
            extract_bearer_token(&with_auth("admin-secret")),
            Err(TokenError::InvalidFormat)
        );
    }

    #[test]
    fn bearer_with_blank_token() {
        assert_eq!(extract_bearer_token(&with_auth("Bearer    ")), Err(TokenError::Empty));
    }
}

#[cfg(test)]
mod signature_tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"event":"message.ack","session":"sales","payload":{"id":"abc","ack":2}}"#;

    #[test]
    fn accepts_matching_signature() {
        let sig = compute_signature(SECRET.as_bytes(), BODY);
        assert_eq!(sig.len(), 128);
        assert_eq!(verify_webhook(Some(SECRET), &signed_headers(&sig), BODY), Ok(()));
    }

    #[test]
    fn hex_case_is_ignored() {
        let sig = compute_signature(SECRET.as_bytes(), BODY).to_uppercase();
        assert_eq!(verify_webhook(Some(SECRET), &signed_headers(&sig), BODY), Ok(()));
    }

    #[test]
    fn flipping_any_body_bit_rejects() {
        let sig = compute_signature(SECRET.as_bytes(), BODY);
        let headers = signed_headers(&sig);
        for byte in [0, BODY.len() / 2, BODY.len() - 1] {
            for bit in 0..8 {
                let mut body = BODY.to_vec();
                body[byte] ^= 1 << bit;
                assert_eq!(
                    verify_webhook(Some(SECRET), &headers, &body),
                    Err(SignatureError::Mismatch)
                );
            }
        }
    }

    #[test]
    fn flipping_any_signature_bit_rejects() {
        let sig = hex::decode(compute_signature(SECRET.as_bytes(), BODY)).unwrap();
        for byte in [0, 31, 63] {
            let mut tampered = sig.clone();
            tampered[byte] ^= 0x01;
            let headers = signed_headers(&hex::encode(&tampered));
            assert_eq!(
                verify_webhook(Some(SECRET), &headers, BODY),
                Err(SignatureError::Mismatch)
            );
        }
    }

    #[test]
    fn wrong_secret_rejects() {
        let sig = compute_signature(b"other", BODY);
        assert_eq!(
            verify_webhook(Some(SECRET), &signed_headers(&sig), BODY),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn missing_or_malformed_header() {
        assert_eq!(
            verify_webhook(Some(SECRET), &HeaderMap::new(), BODY),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            verify_webhook(Some(SECRET), &signed_headers("not-hex"), BODY),
            Err(SignatureError::Malformed)
        );
        // Truncated signature is well-formed hex but cannot match
        let sig = compute_signature(SECRET.as_bytes(), BODY);
        assert_eq!(
            verify_webhook(Some(SECRET), &signed_headers(&sig[..64]), BODY),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn no_secret_disables_verification() {
        assert_eq!(verify_webhook(None, &HeaderMap::new(), BODY), Ok(()));
    }
}
