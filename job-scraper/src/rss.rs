use chrono::DateTime;
use reqwest::Client;
use roxmltree::{Document, Node};

use crate::config::CompanyConfig;
use crate::http::{get_text, ACCEPT_XML};
use crate::location::normalize_location;
use crate::types::{squash_whitespace, FetchError, Posting, Result};

pub(crate) async fn fetch(client: &Client, company: &CompanyConfig) -> Result<Vec<Posting>> {
    let body = get_text(client.get(&company.url), &company.url, ACCEPT_XML).await?;
    parse_feed(&company.name, &company.url, &body)
}

/// Text of the first child whose local name matches, namespaces ignored.
fn child_text<'a>(item: Node<'a, '_>, name: &str) -> Option<&'a str> {
    item.children()
        .find(|child| child.is_element() && child.tag_name().name().eq_ignore_ascii_case(name))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

/// Prefers the feed's preformatted `locationname` (e.g. `US-MA-Natick`),
/// otherwise builds a key from the structured city/state/country fields.
fn item_location(item: Node) -> Option<String> {
    if let Some(name) = child_text(item, "locationname") {
        return Some(name.to_owned());
    }
    normalize_location(
        child_text(item, "country"),
        child_text(item, "state"),
        child_text(item, "city"),
    )
}

/// A document without a `<channel>` (a maintenance page, say) is an error,
/// not an empty feed.
pub fn parse_feed(company: &str, url: &str, xml: &str) -> Result<Vec<Posting>> {
    let doc = Document::parse(xml).map_err(|e| FetchError::parse(url, e))?;
    let has_channel = doc
        .descendants()
        .any(|node| node.is_element() && node.tag_name().name() == "channel");
    if !has_channel {
        return Err(FetchError::ContentNotFound("rss channel"));
    }
    let postings = doc
        .descendants()
        .filter(|node| node.is_element() && node.tag_name().name() == "item")
        .filter_map(|item| {
            let title = child_text(item, "title").map(squash_whitespace)?;
            let link = child_text(item, "link")?;
            let posted_on = child_text(item, "pubDate")
                .and_then(|date| DateTime::parse_from_rfc2822(date).ok())
                .map(|date| date.date_naive());
            let department = child_text(item, "category").map(str::to_owned);
            Some(
                Posting::new(company, &title, link)
                    .with_location(item_location(item))
                    .with_department(department)
                    .with_posted_on(posted_on),
            )
        })
        .collect();
    Ok(postings)
}

#[cfg(test)]
mod test {
    use chrono::NaiveDate;

    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:job="https://www.mathworks.com/jobs">
  <channel>
    <title>MathWorks Jobs</title>
    <item>
      <title>Software Engineer I</title>
      <link>https://www.mathworks.com/company/jobs/opportunities/1001</link>
      <pubDate>Mon, 05 Oct 2026 09:00:00 GMT</pubDate>
      <category>Engineering</category>
      <job:locationname>US-MA-Natick</job:locationname>
    </item>
    <item>
      <title>Application Engineer</title>
      <link>https://www.mathworks.com/company/jobs/opportunities/1002</link>
      <city>cambridge</city>
      <country>gb</country>
    </item>
    <item>
      <title></title>
      <link>https://www.mathworks.com/company/jobs/opportunities/1003</link>
    </item>
    <item>
      <title>Missing link</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed() {
        let postings = parse_feed("MathWorks", "https://www.mathworks.com/rss.xml", FEED).unwrap();
        assert_eq!(postings.len(), 2);

        let first = &postings[0];
        assert_eq!(first.company, "MathWorks");
        assert_eq!(first.title, "Software Engineer I");
        assert_eq!(first.location.as_deref(), Some("US-MA-Natick"));
        assert_eq!(first.department.as_deref(), Some("Engineering"));
        assert_eq!(first.posted_on, NaiveDate::from_ymd_opt(2026, 10, 5));

        let second = &postings[1];
        assert_eq!(second.location.as_deref(), Some("GB--Cambridge"));
        assert_eq!(second.posted_on, None);
    }

    #[test]
    fn test_malformed_feed_is_a_parse_failure() {
        let err = parse_feed("MathWorks", "https://www.mathworks.com/rss.xml", "<rss><channel>")
            .unwrap_err();
        assert!(err.is_parse_failure());
    }

    #[test]
    fn test_page_without_channel_is_not_an_empty_feed() {
        let page = "<html><body><p>Down for maintenance</p></body></html>";
        let err = parse_feed("MathWorks", "https://www.mathworks.com/rss.xml", page).unwrap_err();
        assert!(matches!(err, FetchError::ContentNotFound("rss channel")));
        assert!(err.is_parse_failure());

        let empty = r#"<rss version="2.0"><channel><title>MathWorks Jobs</title></channel></rss>"#;
        assert!(parse_feed("MathWorks", "https://www.mathworks.com/rss.xml", empty)
            .unwrap()
            .is_empty());
    }
}
