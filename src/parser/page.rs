use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::StructuralParseError;

static ITEM_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("article.product_pod").unwrap());
static NEXT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li.next > a[href]").unwrap());
static SHELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.page_inner, ol.row, ul.pager").unwrap());

/// Markup of one catalog entry, detached from its page.
#[derive(Debug, Clone)]
pub struct ItemBlock {
    /// 1-based position on its page.
    pub position: usize,
    pub html: String,
}

#[derive(Debug)]
pub struct ParsedPage {
    pub items: Vec<ItemBlock>,
    pub next: Option<Url>,
}

/// Split a listing page into item blocks and resolve its "next" link against `base`.
///
/// A page without items is valid only if the catalog shell is present;
/// anything else is not a listing page at all.
pub fn parse_page(markup: &str, base: &Url) -> Result<ParsedPage, StructuralParseError> {
    let doc = Html::parse_document(markup);

    let items: Vec<ItemBlock> = doc
        .select(&ITEM_SEL)
        .enumerate()
        .map(|(i, el)| ItemBlock {
            position: i + 1,
            html: el.html(),
        })
        .collect();

    if items.is_empty() && doc.select(&SHELL_SEL).next().is_none() {
        return Err(StructuralParseError::UnrecognizedPage { url: base.clone() });
    }

    let next = match doc
        .select(&NEXT_SEL)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
    {
        Some(href) => Some(base.join(href).map_err(|source| {
            StructuralParseError::BadNextLink {
                url: base.clone(),
                href: href.to_string(),
                source,
            }
        })?),
        None => None,
    };

    debug!(
        "{}: {} item blocks, next = {}",
        base,
        items.len(),
        next.as_ref().map_or("none", Url::as_str)
    );
    Ok(ParsedPage { items, next })
}
