use std::collections::BTreeMap;

/// Default vendor per payment type, used when a request leaves the vendor
/// blank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentTypeCatalog {
    defaults: BTreeMap<String, String>,
}

impl PaymentTypeCatalog {
    /// Charges whose payee is fixed by the port or customs regime.
    pub fn standard() -> Self {
        Self::default()
            .with_default_vendor("Customs Duty", "Customs Authority")
            .with_default_vendor("Port Charges", "Port Authority")
            .with_default_vendor("Delivery Order", "Shipping Line")
            .with_default_vendor("Terminal Handling", "Terminal Operator")
    }

    pub fn with_default_vendor(
        mut self,
        payment_type: impl AsRef<str>,
        vendor: impl Into<String>,
    ) -> Self {
        self.defaults
            .insert(normalize(payment_type.as_ref()), vendor.into());
        self
    }

    pub fn default_vendor(&self, payment_type: &str) -> Option<&str> {
        self.defaults
            .get(&normalize(payment_type))
            .map(String::as_str)
    }

    pub fn payment_types(&self) -> impl Iterator<Item = &str> {
        self.defaults.keys().map(String::as_str)
    }
}

fn normalize(payment_type: &str) -> String {
    payment_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_spacing() {
        let catalog = PaymentTypeCatalog::standard();
        assert_eq!(
            catalog.default_vendor("  customs   DUTY "),
            Some("Customs Authority")
        );
        assert_eq!(catalog.default_vendor("Trucking"), None);
    }
}
