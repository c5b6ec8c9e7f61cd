//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

use super::OrderError;

/// Currency used when an order has nothing priced yet.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Customer reference. Opaque; owned by another system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CustomerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CustomerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An amount in integer minor units (cents) of a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Zero in `currency`.
    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0, currency)
    }

    /// Shorthand for a USD amount in cents.
    pub fn usd(cents: i64) -> Self {
        Self::new(cents, "USD")
    }

    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Currency codes are three ASCII letters (ISO 4217 shape).
    pub fn validate_currency(&self) -> Result<(), OrderError> {
        if self.currency.len() == 3 && self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(())
        } else {
            Err(OrderError::InvalidCurrency {
                currency: self.currency.clone(),
            })
        }
    }

    /// Adds two amounts of the same currency.
    pub fn checked_add(&self, other: &Money) -> Result<Money, OrderError> {
        if self.currency != other.currency {
            return Err(OrderError::CurrencyMismatch {
                expected: self.currency.clone(),
                actual: other.currency.clone(),
            });
        }
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(OrderError::AmountOverflow)?;
        Ok(Money::new(amount, self.currency.clone()))
    }

    /// Multiplies by a quantity.
    pub fn checked_mul(&self, quantity: u32) -> Result<Money, OrderError> {
        let amount = self
            .amount
            .checked_mul(i64::from(quantity))
            .ok_or(OrderError::AmountOverflow)?;
        Ok(Money::new(amount, self.currency.clone()))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero(DEFAULT_CURRENCY)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}

/// Shipping address. Every field is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

impl Address {
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        zip: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            state: state.into(),
            zip: zip.into(),
            country: country.into(),
        }
    }

    /// Rejects the first blank field.
    pub fn validate(&self) -> Result<(), OrderError> {
        let fields = [
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("zip", &self.zip),
            ("country", &self.country),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(OrderError::InvalidAddress { field });
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}",
            self.street, self.city, self.state, self.zip, self.country
        )
    }
}

/// A line item. The same product may appear on several lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price.
    pub price: Money,
}

impl OrderItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            price,
        }
    }

    /// `price × quantity`.
    pub fn subtotal(&self) -> Result<Money, OrderError> {
        self.price.checked_mul(self.quantity)
    }

    /// Checks the line on its own: product id present, quantity positive,
    /// price non-negative in a well-formed currency.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.product_id.as_str().trim().is_empty() {
            return Err(OrderError::ProductIdRequired);
        }
        if self.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: self.product_id.to_string(),
                quantity: self.quantity,
            });
        }
        if self.price.is_negative() {
            return Err(OrderError::InvalidPrice {
                product_id: self.product_id.to_string(),
                amount: self.price.amount,
            });
        }
        self.price.validate_currency()
    }
}

/// Sum of item subtotals, in `currency`.
///
/// Items are assumed to be in `currency` already; the aggregate rejects
/// anything else before it gets here. Fails with
/// [`OrderError::AmountOverflow`] when the sum leaves the `i64` range.
pub fn order_total(items: &[OrderItem], currency: &str) -> Result<Money, OrderError> {
    items.iter().try_fold(Money::zero(currency), |total, item| {
        let subtotal = item.subtotal()?;
        let amount = total
            .amount
            .checked_add(subtotal.amount)
            .ok_or(OrderError::AmountOverflow)?;
        Ok(Money::new(amount, total.currency))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        assert_eq!(Money::usd(1234).to_string(), "12.34 USD");
        assert_eq!(Money::usd(5).to_string(), "0.05 USD");
        assert_eq!(Money::new(-1234, "EUR").to_string(), "-12.34 EUR");
    }

    #[test]
    fn test_money_rejects_mixed_currency() {
        let usd = Money::usd(100);
        let eur = Money::new(100, "EUR");
        assert!(matches!(
            usd.checked_add(&eur),
            Err(OrderError::CurrencyMismatch { .. })
        ));
        assert_eq!(usd.checked_add(&Money::usd(50)).unwrap().amount, 150);
    }

    #[test]
    fn test_currency_shape() {
        assert!(Money::usd(1).validate_currency().is_ok());
        assert!(Money::new(1, "US").validate_currency().is_err());
        assert!(Money::new(1, "U$D").validate_currency().is_err());
    }

    #[test]
    fn test_address_requires_every_field() {
        let mut address = Address::new("1 Main St", "Springfield", "IL", "62701", "US");
        assert!(address.validate().is_ok());

        address.zip = "  ".to_string();
        assert!(matches!(
            address.validate(),
            Err(OrderError::InvalidAddress { field: "zip" })
        ));
    }

    #[test]
    fn test_item_validation() {
        assert!(OrderItem::new("SKU-1", 1, Money::usd(0)).validate().is_ok());
        assert!(matches!(
            OrderItem::new("SKU-1", 0, Money::usd(10)).validate(),
            Err(OrderError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            OrderItem::new("SKU-1", 1, Money::usd(-1)).validate(),
            Err(OrderError::InvalidPrice { .. })
        ));
        assert!(matches!(
            OrderItem::new(" ", 1, Money::usd(1)).validate(),
            Err(OrderError::ProductIdRequired)
        ));
    }

    #[test]
    fn test_order_total_sums_subtotals() {
        let items = vec![
            OrderItem::new("A", 2, Money::usd(1000)),
            OrderItem::new("B", 1, Money::usd(500)),
        ];
        assert_eq!(order_total(&items, "USD").unwrap(), Money::usd(2500));
        assert_eq!(order_total(&[], "USD").unwrap(), Money::usd(0));
    }

    #[test]
    fn test_order_total_overflow_is_rejected() {
        let huge = OrderItem::new("A", 4_000_000, Money::usd(i64::MAX / 1000));
        assert_eq!(huge.subtotal(), Err(OrderError::AmountOverflow));
        assert_eq!(order_total(&[huge], "USD"), Err(OrderError::AmountOverflow));

        let half = OrderItem::new("B", 1, Money::usd(i64::MAX / 2 + 1));
        assert_eq!(
            order_total(&[half.clone(), half], "USD"),
            Err(OrderError::AmountOverflow)
        );
        assert_eq!(
            Money::usd(i64::MAX).checked_add(&Money::usd(1)),
            Err(OrderError::AmountOverflow)
        );
    }
}
