//! Conversions between the provider column type and the adapter-side provider kind.
use accounting_auth::oauth::ProviderKind;
use entity::provider::Provider;

pub fn to_column(kind: ProviderKind) -> Provider {
    match kind {
        ProviderKind::QuickBooks => Provider::QuickBooks,
        ProviderKind::Xero => Provider::Xero,
        ProviderKind::Wave => Provider::Wave,
    }
}

pub fn from_column(provider: Provider) -> ProviderKind {
    match provider {
        Provider::QuickBooks => ProviderKind::QuickBooks,
        Provider::Xero => ProviderKind::Xero,
        Provider::Wave => ProviderKind::Wave,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_kind_has_a_column_value() {
        for kind in ProviderKind::ALL {
            assert_eq!(from_column(to_column(kind)), kind);
        }
    }
}
