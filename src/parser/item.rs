use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::page::ItemBlock;
use crate::error::{Field, ItemExtractionError};
use crate::record::Record;

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3 a").unwrap());
static PRICE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".price_color").unwrap());
static STOCK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".availability").unwrap());
static RATING_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".star-rating").unwrap());

static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d(?:[\d.,'\u{a0} ]*\d)?").unwrap());
static CURRENCY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{Sc}").unwrap());
static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

const RATING_WORDS: &[(&str, u8)] = &[("one", 1), ("two", 2), ("three", 3), ("four", 4), ("five", 5)];

/// Turn one item block into a `Record`. Title and price are required;
/// stock and rating degrade to "unavailable" / `None`.
pub fn extract(block: &ItemBlock) -> Result<Record, ItemExtractionError> {
    let fragment = Html::parse_fragment(&block.html);
    let position = block.position;

    let title = fragment
        .select(&TITLE_SEL)
        .next()
        .map(title_of)
        .filter(|t| !t.is_empty())
        .ok_or(ItemExtractionError::Missing {
            position,
            field: Field::Title,
        })?;

    let price_text = fragment
        .select(&PRICE_SEL)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
        .ok_or(ItemExtractionError::Missing {
            position,
            field: Field::Price,
        })?;
    let price = parse_price(&price_text).ok_or_else(|| ItemExtractionError::Unparsable {
        position,
        field: Field::Price,
        raw: price_text.clone(),
    })?;

    let availability = fragment
        .select(&STOCK_SEL)
        .next()
        .map(|el| parse_availability(&text_of(el)))
        .unwrap_or(false);

    let rating = fragment
        .select(&RATING_SEL)
        .next()
        .and_then(|el| el.value().classes().find_map(rating_from_token));

    Ok(Record {
        title,
        price,
        availability,
        rating,
    })
}

/// The anchor's `title` attribute carries the full name; its text may be truncated.
fn title_of(anchor: ElementRef) -> String {
    anchor
        .value()
        .attr("title")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| text_of(anchor))
}

fn text_of(el: ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Field parsers ──

/// Parse locale-formatted currency text: "£51.77", "1,234.50 $", "€ 12,99", "1.234,50".
/// The amount next to the currency symbol wins; negative amounts are rejected.
pub fn parse_price(text: &str) -> Option<f64> {
    let m = amount_match(text)?;
    let sign = text[..m.start()]
        .chars()
        .rev()
        .filter(|c| !c.is_whitespace())
        .find(|c| !is_currency(*c));
    if sign == Some('-') {
        return None;
    }

    let raw: String = m
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let value: f64 = normalize_decimal(&raw).parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// First amount right after a currency symbol, else right before one,
/// else the first amount in the text.
fn amount_match(text: &str) -> Option<regex::Match<'_>> {
    let amounts: Vec<_> = AMOUNT_RE.find_iter(text).collect();
    let symbols: Vec<_> = CURRENCY_RE.find_iter(text).collect();
    let gap_is_blank = |from: usize, to: usize| from <= to && text[from..to].trim().is_empty();

    amounts
        .iter()
        .find(|a| symbols.iter().any(|s| gap_is_blank(s.end(), a.start())))
        .or_else(|| {
            amounts
                .iter()
                .find(|a| symbols.iter().any(|s| gap_is_blank(a.end(), s.start())))
        })
        .or(amounts.first())
        .copied()
}

fn is_currency(c: char) -> bool {
    CURRENCY_RE.is_match(c.encode_utf8(&mut [0; 4]))
}

/// Decide which separator (if any) is the decimal point and drop the rest.
/// A lone separator followed by exactly three digits groups thousands
/// ("1,234" and "1.234" are both 1234); otherwise it is the decimal point.
fn normalize_decimal(raw: &str) -> String {
    let dots = raw.matches('.').count();
    let commas = raw.matches(',').count();
    let is_decimal = |at: usize| raw.len() - at - 1 != 3;

    let decimal_at = match (raw.rfind('.'), raw.rfind(',')) {
        (Some(d), Some(c)) => Some(d.max(c)),
        (Some(d), None) if dots == 1 && is_decimal(d) => Some(d),
        (None, Some(c)) if commas == 1 && is_decimal(c) => Some(c),
        _ => None,
    };

    raw.char_indices()
        .filter_map(|(i, ch)| match ch {
            '0'..='9' => Some(ch),
            _ if Some(i) == decimal_at => Some('.'),
            _ => None,
        })
        .collect()
}

/// Any positive count in the stock text means available; no digits means not.
pub fn parse_availability(text: &str) -> bool {
    COUNT_RE
        .find_iter(text)
        .any(|m| m.as_str().parse::<u64>().map_or(true, |n| n > 0))
}

pub fn rating_from_token(token: &str) -> Option<u8> {
    RATING_WORDS
        .iter()
        .find(|(word, _)| word.eq_ignore_ascii_case(token))
        .map(|&(_, n)| n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(html: &str) -> ItemBlock {
        ItemBlock {
            position: 7,
            html: html.to_string(),
        }
    }

    fn pod(title: &str, price: &str, stock: &str, rating_class: &str) -> ItemBlock {
        block(&format!(
            r#"<article class="product_pod">
                <p class="star-rating {rating_class}"><i class="icon-star"></i></p>
                <h3><a href="x/index.html" title="{title}">{title}</a></h3>
                <div class="product_price">
                    <p class="price_color">{price}</p>
                    <p class="instock availability"><i class="icon-ok"></i> {stock}</p>
                </div>
            </article>"#
        ))
    }

    #[test]
    fn well_formed_item() {
        let r = extract(&pod("Sharp Objects", "£47.82", "In stock (19 available)", "Four")).unwrap();
        assert_eq!(
            r,
            Record {
                title: "Sharp Objects".into(),
                price: 47.82,
                availability: true,
                rating: Some(4),
            }
        );
    }

    #[test]
    fn title_attribute_beats_truncated_text() {
        let b = block(
            r#"<article class="product_pod"><h3><a title="A Light in the Attic">A Light in the ...</a></h3><p class="price_color">£51.77</p></article>"#,
        );
        assert_eq!(extract(&b).unwrap().title, "A Light in the Attic");
    }

    #[test]
    fn falls_back_to_anchor_text() {
        let b = block(
            r#"<article class="product_pod"><h3><a>  Soumission  </a></h3><p class="price_color">£50.10</p></article>"#,
        );
        assert_eq!(extract(&b).unwrap().title, "Soumission");
    }

    #[test]
    fn empty_title_is_item_error() {
        let err = extract(&pod("", "£10.00", "In stock", "One")).unwrap_err();
        assert_eq!(
            err,
            ItemExtractionError::Missing {
                position: 7,
                field: Field::Title
            }
        );
    }

    #[test]
    fn missing_price_is_item_error() {
        let b = block(r#"<article class="product_pod"><h3><a title="No Price">No Price</a></h3></article>"#);
        let err = extract(&b).unwrap_err();
        assert_eq!(err.field(), Field::Price);
    }

    #[test]
    fn unparsable_price_keeps_raw_text() {
        let err = extract(&pod("Free Book", "free!", "In stock", "Two")).unwrap_err();
        assert_eq!(
            err,
            ItemExtractionError::Unparsable {
                position: 7,
                field: Field::Price,
                raw: "free!".into()
            }
        );
    }

    #[test]
    fn negative_price_is_rejected() {
        assert!(extract(&pod("Refund", "-£5.00", "In stock", "Two")).is_err());
    }

    #[test]
    fn stock_without_digits_is_unavailable() {
        let r = extract(&pod("Tipping the Velvet", "£53.74", "In stock", "One")).unwrap();
        assert!(!r.availability);
    }

    #[test]
    fn missing_stock_field_is_unavailable() {
        let b = block(r#"<article class="product_pod"><h3><a title="T">T</a></h3><p class="price_color">£1.00</p></article>"#);
        let r = extract(&b).unwrap();
        assert!(!r.availability);
        assert_eq!(r.rating, None);
    }

    #[test]
    fn unmapped_rating_is_absent() {
        let r = extract(&pod("Zero Stars", "£1.00", "In stock", "Zero")).unwrap();
        assert_eq!(r.rating, None);
    }

    #[test]
    fn rating_words() {
        assert_eq!(rating_from_token("Three"), Some(3));
        assert_eq!(rating_from_token("FIVE"), Some(5));
        assert_eq!(rating_from_token("one"), Some(1));
        assert_eq!(rating_from_token("Zero"), None);
        assert_eq!(rating_from_token("star-rating"), None);
    }

    #[test]
    fn availability_tokens() {
        assert!(parse_availability("19 available"));
        assert!(parse_availability("In stock (1 available)"));
        assert!(!parse_availability("In stock"));
        assert!(!parse_availability("0 available"));
        assert!(!parse_availability(""));
    }

    #[test]
    fn prices() {
        assert_eq!(parse_price("£51.77"), Some(51.77));
        assert_eq!(parse_price("Â£51.77"), Some(51.77));
        assert_eq!(parse_price("$1,234.50"), Some(1234.5));
        assert_eq!(parse_price("1.234,50 €"), Some(1234.5));
        assert_eq!(parse_price("€ 12,99"), Some(12.99));
        assert_eq!(parse_price("1,234"), Some(1234.0));
        assert_eq!(parse_price("1 234,56 zł"), Some(1234.56));
        assert_eq!(parse_price("£0.00"), Some(0.0));
        assert_eq!(parse_price("£20"), Some(20.0));
        assert_eq!(parse_price("n/a"), None);
        assert_eq!(parse_price("-3.00"), None);
        assert_eq!(parse_price("£-3.00"), None);
    }

    #[test]
    fn single_three_digit_group_is_thousands_for_either_separator() {
        assert_eq!(parse_price("1,234"), Some(1234.0));
        assert_eq!(parse_price("1.234 €"), Some(1234.0));
        assert_eq!(parse_price("£1.5"), Some(1.5));
        assert_eq!(parse_price("12,5 €"), Some(12.5));
        assert_eq!(parse_price("1.234.567"), Some(1234567.0));
    }

    #[test]
    fn amount_beside_currency_symbol_wins() {
        assert_eq!(parse_price("2 for £10.00"), Some(10.0));
        assert_eq!(parse_price("Pack of 3: 12,50 €"), Some(12.5));
    }

    #[test]
    fn fixture_items_in_block_order() {
        let html = std::fs::read_to_string("tests/fixtures/page-1.html").unwrap();
        let base = url::Url::parse("http://books.toscrape.com/catalogue/page-1.html").unwrap();
        let page = crate::parser::page::parse_page(&html, &base).unwrap();
        let results: Vec<_> = page.items.iter().map(extract).collect();

        assert_eq!(results.len(), 4);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.title, "A Light in the Attic");
        assert_eq!(first.price, 51.77);
        assert!(first.availability);
        assert_eq!(first.rating, Some(3));
        assert!(results[1].is_ok());
        assert!(results[2].is_ok());
        assert!(matches!(
            results[3],
            Err(ItemExtractionError::Missing { position: 4, field: Field::Title })
        ));
    }
}
