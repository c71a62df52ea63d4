//! Certified-bank matcher
//!
//! Exact-key lookup of a product name against a certified image snapshot.
//! Pure query: recording the usage of a hit is the caller's job.

use crate::models::CertifiedImage;
use crate::services::normalizer::normalize;

/// First certified image whose normalized name equals the product's
///
/// No fuzzy matching and no ranking. The snapshot order decides ties, so the
/// same snapshot always yields the same match. Names that normalize to the
/// empty key never match.
pub fn find_match<'a>(images: &'a [CertifiedImage], product_name: &str) -> Option<&'a CertifiedImage> {
    let key = normalize(product_name);
    if key.is_empty() {
        return None;
    }

    images.iter().find(|image| normalize(&image.product_name) == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn image(product_name: &str, url: &str) -> CertifiedImage {
        CertifiedImage {
            id: Uuid::new_v4(),
            product_name: product_name.to_string(),
            normalized_name: normalize(product_name),
            image_url: url.to_string(),
            category: None,
            description: None,
            usage_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_match_ignores_case_and_accents() {
        let bank = vec![image("Feijão Preto 1kg", "https://bank/feijao.png")];
        let hit = find_match(&bank, "FEIJAO PRETO 1KG").unwrap();
        assert_eq!(hit.image_url, "https://bank/feijao.png");
    }

    #[test]
    fn test_no_partial_matches() {
        let bank = vec![image("Feijão Preto 1kg", "https://bank/feijao.png")];
        assert!(find_match(&bank, "Feijao Preto").is_none());
        assert!(find_match(&bank, "Feijao Preto 1kg Camil").is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let bank = vec![
            image("Arroz 5kg", "https://bank/first.png"),
            image("arroz 5KG", "https://bank/second.png"),
        ];
        assert_eq!(find_match(&bank, "Arroz 5kg").unwrap().image_url, "https://bank/first.png");
    }

    #[test]
    fn test_uses_product_name_not_stored_key() {
        let mut stale = image("Óleo de Soja", "https://bank/oleo.png");
        stale.normalized_name = "something else".to_string();
        let bank = vec![stale];
        assert!(find_match(&bank, "oleo de soja").is_some());
    }

    #[test]
    fn test_empty_key_never_matches() {
        let bank = vec![image("!!!", "https://bank/none.png")];
        assert!(find_match(&bank, "???").is_none());
        assert!(find_match(&[], "Arroz").is_none());
    }
}
