//! Validation utilities for ledger input

use rust_decimal::Decimal;

use crate::money::MINOR_UNIT_SCALE;

/// Longest accepted product or farmer name
pub const MAX_NAME_LENGTH: usize = 100;

/// Largest quantity accepted on a single line or movement
pub const MAX_QUANTITY: i64 = 10_000_000;

/// Largest unit price accepted, in currency units
pub const MAX_UNIT_PRICE: i64 = 10_000_000;

// ============================================================================
// Reference Data Validations
// ============================================================================

/// Validate a product or farmer name
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Name must not be empty");
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err("Name must be at most 100 characters");
    }
    Ok(())
}

/// Canonical form stored for a name
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Uniqueness key for a name: normalized and lowercased across all of Unicode
pub fn name_key(name: &str) -> String {
    normalize_name(name).to_lowercase()
}

// ============================================================================
// Quantity & Price Validations
// ============================================================================

/// Validate a unit quantity
pub fn validate_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be a positive integer");
    }
    if quantity > MAX_QUANTITY {
        return Err("Quantity must be at most 10000000");
    }
    Ok(())
}

/// Validate a purchase or resale unit price
pub fn validate_unit_price(price: Decimal) -> Result<(), &'static str> {
    if price <= Decimal::ZERO {
        return Err("Unit price must be positive");
    }
    if price > Decimal::from(MAX_UNIT_PRICE) {
        return Err("Unit price must be at most 10000000");
    }
    if price.normalize().scale() > MINOR_UNIT_SCALE {
        return Err("Unit price must have at most 4 decimal places");
    }
    Ok(())
}

/// Validate a refund amount (zero is allowed)
pub fn validate_refund(amount: Decimal) -> Result<(), &'static str> {
    if amount < Decimal::ZERO {
        return Err("Refund amount cannot be negative");
    }
    if amount.normalize().scale() > MINOR_UNIT_SCALE {
        return Err("Refund amount must have at most 4 decimal places");
    }
    Ok(())
}

// ============================================================================
// Account Validations
// ============================================================================

/// Validate a login name
pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.len() < 3 || username.len() > 32 {
        return Err("Username must be 3-32 characters");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err("Username may only contain letters, digits, '_', '.' and '-'");
    }
    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Tomato").is_ok());
        assert!(validate_name("  ").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_normalize_name_collapses_whitespace() {
        assert_eq!(normalize_name("  Farmer   A "), "Farmer A");
    }

    #[test]
    fn test_name_key_folds_non_ascii_case() {
        assert_eq!(name_key("  Épinard "), name_key("épinard"));
        assert_eq!(name_key("ÇA  VA"), "ça va");
        assert_ne!(name_key("Épinard"), name_key("Epinard"));
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_QUANTITY).is_ok());
        assert!(validate_quantity(MAX_QUANTITY + 1).is_err());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-5).is_err());
    }

    #[test]
    fn test_validate_unit_price() {
        assert!(validate_unit_price(Decimal::from_str("0.01").unwrap()).is_ok());
        assert!(validate_unit_price(Decimal::from_str("65.1250").unwrap()).is_ok());
        assert!(validate_unit_price(Decimal::ZERO).is_err());
        assert!(validate_unit_price(Decimal::from_str("-1").unwrap()).is_err());
        assert!(validate_unit_price(Decimal::from_str("1.00001").unwrap()).is_err());
        assert!(validate_unit_price(Decimal::from(MAX_UNIT_PRICE)).is_ok());
        assert!(validate_unit_price(Decimal::from_str("10000000.0001").unwrap()).is_err());
    }

    #[test]
    fn test_validate_refund_allows_zero() {
        assert!(validate_refund(Decimal::ZERO).is_ok());
        assert!(validate_refund(Decimal::from_str("-0.5").unwrap()).is_err());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("admin").is_ok());
        assert!(validate_username("clerk.two").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("bad name").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("password123").is_ok());
        assert!(validate_password("short").is_err());
    }
}
