//! Shared helper functions for PostgreSQL row conversion.

use ferry_core::error::{StorageError, StorageResult};

/// Convert a `Vec<u8>` to a fixed-size 32-byte array.
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_hash32(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; 32]> {
    bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 32, got {}",
            field_name,
            v.len()
        ))
    })
}

/// Convert an optional `Vec<u8>` to an optional 32-byte array.
pub fn bytes_to_optional_hash32(
    bytes: Option<Vec<u8>>,
    field_name: &str,
) -> StorageResult<Option<[u8; 32]>> {
    match bytes {
        Some(b) => Ok(Some(bytes_to_hash32(b, field_name)?)),
        None => Ok(None),
    }
}

/// Convert a stored BIGINT back to a block number or nonce.
pub fn i64_to_u64(value: i64, field_name: &str) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{field_name} is negative: {value}"))
    })
}

/// Convert a block number or nonce to a BIGINT bind value.
pub fn u64_to_i64(value: u64, field_name: &str) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{field_name} exceeds BIGINT: {value}"))
    })
}

/// Convert a stored SMALLINT back to a domain id.
pub fn i16_to_domain_id(value: i16, field_name: &str) -> StorageResult<u8> {
    u8::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{field_name} out of range: {value}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: erreurs incluent le nom du champ pour debug
    #[test]
    fn test_error_includes_field_name() {
        let bad_bytes = vec![1u8; 16]; // mauvaise longueur
        let result = bytes_to_hash32(bad_bytes, "transfer.resource_id");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("transfer.resource_id"));
        assert!(err.contains("expected 32"));
    }

    #[test]
    fn test_optional_hash_passes_none_through() {
        assert_eq!(bytes_to_optional_hash32(None, "x").unwrap(), None);
        assert_eq!(
            bytes_to_optional_hash32(Some(vec![7u8; 32]), "x").unwrap(),
            Some([7u8; 32])
        );
    }

    // Test critique: une valeur négative en base est une corruption
    #[test]
    fn test_negative_values_rejected() {
        assert_eq!(i64_to_u64(42, "block").unwrap(), 42);
        assert!(i64_to_u64(-1, "block").unwrap_err().to_string().contains("block"));
        assert_eq!(i16_to_domain_id(3, "domain").unwrap(), 3);
        assert!(i16_to_domain_id(300, "domain").is_err());
        assert!(i16_to_domain_id(-2, "domain").is_err());
    }

    // Test critique: un nonce au-delà de i64::MAX est refusé au lieu d'être tronqué
    #[test]
    fn test_oversized_values_rejected_on_bind() {
        assert_eq!(u64_to_i64(1_024, "nonce").unwrap(), 1_024);
        assert_eq!(u64_to_i64(i64::MAX as u64, "nonce").unwrap(), i64::MAX);
        let err = u64_to_i64(u64::MAX, "transfer.deposit_nonce").unwrap_err();
        assert!(matches!(err, StorageError::SerializationError(_)));
        assert!(err.to_string().contains("transfer.deposit_nonce"));
    }
}
