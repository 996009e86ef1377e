use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("token must have 3 segments, found {0}")]
    SegmentCount(usize),
    #[error("token {0} segment is empty")]
    EmptySegment(&'static str),
    #[error("payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not json: {0}")]
    Json(#[source] serde_json::Error),
    #[error("payload is not a claims record")]
    NotARecord,
    #[error("claims do not match schema: {0}")]
    Schema(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("token is missing required claim `{0}`")]
    MissingClaim(&'static str),
    #[error("token expired at {expires_at}")]
    Expired { expires_at: i64 },
}

pub type DecodeResult<T> = Result<T, DecodeError>;
pub type IdentityResult<T> = Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let errors: Vec<IdentityError> = vec![
            DecodeError::SegmentCount(2).into(),
            DecodeError::EmptySegment("payload").into(),
            DecodeError::NotARecord.into(),
            IdentityError::MissingClaim("sub"),
            IdentityError::Expired { expires_at: 10 },
        ];

        for error in errors {
            let rendered = error.to_string();
            assert!(!rendered.is_empty());
        }
    }

    #[test]
    fn decode_errors_stay_distinct_from_missing_claims() {
        let decode: IdentityError = DecodeError::NotARecord.into();
        assert!(matches!(decode, IdentityError::Decode(_)));
        assert!(!matches!(
            IdentityError::MissingClaim("permissoes"),
            IdentityError::Decode(_)
        ));
    }
}
