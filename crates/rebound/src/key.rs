// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};

/// Stable identifier of a logical operation.
///
/// An operation key scopes one policy, one circuit breaker and one failure window. Two calls
/// that use the same key share circuit state; calls with distinct keys never do.
///
/// Keys are cheap to clone when created from static strings:
///
/// ```
/// use rebound::OperationKey;
///
/// let key = OperationKey::from("inventory.lookup");
/// assert_eq!(key.as_str(), "inventory.lookup");
///
/// let method = OperationKey::method("PaymentClient", "charge");
/// assert_eq!(method.as_str(), "PaymentClient.charge");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey(Cow<'static, str>);

impl OperationKey {
    /// Creates a key from any string-like value.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Creates a key in the `Type.method` form, used when an operation is named after the
    /// method it wraps.
    #[must_use]
    pub fn method(type_name: &str, method_name: &str) -> Self {
        Self(Cow::Owned(format!("{type_name}.{method_name}")))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OperationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for OperationKey {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for OperationKey {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl From<&Self> for OperationKey {
    fn from(value: &Self) -> Self {
        value.clone()
    }
}

impl AsRef<str> for OperationKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
