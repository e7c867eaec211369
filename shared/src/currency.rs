//! Country to ISO 4217 currency table and the display-currency precedence.

use serde::{Deserialize, Serialize};

/// Used whenever no better currency can be determined.
pub const FALLBACK_CURRENCY: &str = "USD";

/// Returns the ISO 4217 code in use in the given ISO 3166-1 alpha-2 country.
#[must_use]
pub fn currency_for_country(country_code: &str) -> Option<&'static str> {
    let code = country_code.trim().to_ascii_uppercase();
    let currency = match code.as_str() {
        // Eurozone
        "AT" | "BE" | "CY" | "DE" | "EE" | "ES" | "FI" | "FR" | "GR" | "HR" | "IE" | "IT"
        | "LT" | "LU" | "LV" | "MT" | "NL" | "PT" | "SI" | "SK" | "MC" | "SM" | "VA" | "AD"
        | "ME" | "XK" => "EUR",
        "US" | "EC" | "SV" | "PA" | "PR" | "TL" => "USD",
        "BR" => "BRL",
        "GB" => "GBP",
        "CH" | "LI" => "CHF",
        "CA" => "CAD",
        "MX" => "MXN",
        "AR" => "ARS",
        "CL" => "CLP",
        "CO" => "COP",
        "PE" => "PEN",
        "UY" => "UYU",
        "PY" => "PYG",
        "BO" => "BOB",
        "VE" => "VES",
        "DO" => "DOP",
        "GT" => "GTQ",
        "HN" => "HNL",
        "NI" => "NIO",
        "CR" => "CRC",
        "CU" => "CUP",
        "AO" => "AOA",
        "MZ" => "MZN",
        "CV" => "CVE",
        "AU" => "AUD",
        "NZ" => "NZD",
        "JP" => "JPY",
        "CN" => "CNY",
        "IN" => "INR",
        "ZA" => "ZAR",
        "NG" => "NGN",
        "SE" => "SEK",
        "NO" => "NOK",
        "DK" => "DKK",
        "PL" => "PLN",
        "CZ" => "CZK",
        "HU" => "HUF",
        "RO" => "RON",
        "TR" => "TRY",
        "SG" => "SGD",
        "PH" => "PHP",
        "SN" | "CI" | "ML" | "NE" | "BF" | "TG" | "BJ" | "GW" => "XOF",
        "CM" | "GA" | "CG" | "GQ" | "TD" | "CF" => "XAF",
        _ => return None,
    };
    Some(currency)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrencySource {
    Explicit,
    Coordinates,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyResolution {
    pub code: String,
    pub source: CurrencySource,
}

impl CurrencyResolution {
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            code: FALLBACK_CURRENCY.to_string(),
            source: CurrencySource::Fallback,
        }
    }
}

/// Normalizes an explicit currency code. Anything that is not three ASCII
/// letters is treated as absent.
#[must_use]
pub fn normalize_currency_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(trimmed.to_ascii_uppercase())
    } else {
        None
    }
}

/// Applies the precedence explicit currency, then the country at the stored
/// coordinates, then the fallback.
#[must_use]
pub fn resolve_display_currency(
    explicit: Option<&str>,
    country_code: Option<&str>,
) -> CurrencyResolution {
    if let Some(code) = explicit.and_then(normalize_currency_code) {
        return CurrencyResolution {
            code,
            source: CurrencySource::Explicit,
        };
    }
    if let Some(code) = country_code.and_then(currency_for_country) {
        return CurrencyResolution {
            code: code.to_string(),
            source: CurrencySource::Coordinates,
        };
    }
    CurrencyResolution::fallback()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookups() {
        assert_eq!(currency_for_country("BR"), Some("BRL"));
        assert_eq!(currency_for_country("pt"), Some("EUR"));
        assert_eq!(currency_for_country(" gb "), Some("GBP"));
        assert_eq!(currency_for_country("SN"), Some("XOF"));
        assert_eq!(currency_for_country("ZZ"), None);
    }

    #[test]
    fn test_explicit_wins() {
        let r = resolve_display_currency(Some("chf"), Some("BR"));
        assert_eq!(r.code, "CHF");
        assert_eq!(r.source, CurrencySource::Explicit);
    }

    #[test]
    fn test_coordinates_when_no_explicit() {
        let r = resolve_display_currency(None, Some("MX"));
        assert_eq!(r.code, "MXN");
        assert_eq!(r.source, CurrencySource::Coordinates);
    }

    #[test]
    fn test_malformed_explicit_is_ignored() {
        let r = resolve_display_currency(Some("reais"), Some("BR"));
        assert_eq!(r.code, "BRL");
        assert_eq!(r.source, CurrencySource::Coordinates);
    }

    #[test]
    fn test_fallback() {
        assert_eq!(resolve_display_currency(None, None), CurrencyResolution::fallback());
        assert_eq!(
            resolve_display_currency(None, Some("AQ")).code,
            FALLBACK_CURRENCY
        );
    }
}
