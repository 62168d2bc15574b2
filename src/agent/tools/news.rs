use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use url::Url;

use crate::agent::tool_registry::{input_text, Tool};

const NEWS_SEARCH_URL: &str = "https://www.google.com/search";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Ubuntu; Linux i686; rv:64.0) Gecko/20100101 Firefox/64.0";
const LANG: &str = "en";
const PERIOD: &str = "7d";
pub const NEWS_FAILED: &str = "Error searching news";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsItem {
    pub title: String,
    pub media: String,
    pub date: String,
    pub datetime: String,
    pub desc: String,
    pub link: String,
    pub img: String,
}

pub struct GoogleNewsTool {
    client: Client,
}

impl GoogleNewsTool {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build news HTTP client")?;
        Ok(Self { client })
    }

    async fn search(&self, query: &str) -> Result<Vec<NewsItem>> {
        let lang = format!("lang_{}", LANG);
        let period = format!("qdr:{}", PERIOD);
        let url = Url::parse_with_params(
            NEWS_SEARCH_URL,
            &[
                ("q", query),
                ("lr", lang.as_str()),
                ("tbs", period.as_str()),
                ("tbm", "nws"),
            ],
        )?;

        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, format!("{};q=0.9", LANG))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("news search returned {}", status);
        }
        let html = resp.text().await?;
        parse_results(&html, Utc::now())
    }
}

#[async_trait]
impl Tool for GoogleNewsTool {
    fn name(&self) -> &str {
        "Google_News_Search"
    }

    fn description(&self) -> &str {
        "Call this tool to search google news, input is the search query string"
    }

    async fn execute(&self, args: &Value) -> Result<String> {
        let query = input_text(args);
        match self.search(&query).await {
            Ok(items) => {
                info!(query = %query, results = items.len(), "News search finished");
                let rendered: Vec<String> = items
                    .iter()
                    .map(serde_json::to_string_pretty)
                    .collect::<Result<_, _>>()?;
                Ok(rendered.join("\n"))
            }
            Err(e) => {
                error!(query = %query, "News search failed: {:#}", e);
                Ok(NEWS_FAILED.to_string())
            }
        }
    }
}

/// jQuery-style set of elements, enough to walk the result markup.
struct Selection<'a>(Vec<ElementRef<'a>>);

impl<'a> Selection<'a> {
    fn push_unique(items: &mut Vec<ElementRef<'a>>, element: ElementRef<'a>) {
        if !items.iter().any(|e| e.id() == element.id()) {
            items.push(element);
        }
    }

    /// Descendants (not the elements themselves) with the given tag.
    fn find(&self, tag: &str) -> Self {
        let mut found = Vec::new();
        for element in &self.0 {
            for node in element.descendants().skip(1) {
                if let Some(child) = ElementRef::wrap(node) {
                    if child.value().name() == tag {
                        Self::push_unique(&mut found, child);
                    }
                }
            }
        }
        Selection(found)
    }

    /// Next element sibling of each element.
    fn next(&self) -> Self {
        let mut found = Vec::new();
        for element in &self.0 {
            if let Some(sibling) = element.next_siblings().find_map(ElementRef::wrap) {
                Self::push_unique(&mut found, sibling);
            }
        }
        Selection(found)
    }

    fn text(&self) -> String {
        self.0
            .iter()
            .flat_map(|e| e.text())
            .collect::<String>()
            .trim()
            .to_string()
    }

    fn attr(&self, name: &str) -> String {
        self.0
            .first()
            .and_then(|e| e.value().attr(name))
            .unwrap_or_default()
            .to_string()
    }
}

fn parse_results(html: &str, now: DateTime<Utc>) -> Result<Vec<NewsItem>> {
    let document = Html::parse_document(html);
    let articles = Selector::parse("a[jsname]").map_err(|e| anyhow!("invalid selector: {:?}", e))?;
    // Results are only narrowed to the last week, so every item gets that lower bound.
    let datetime = (now - chrono::Duration::days(7)).to_rfc3339_opts(SecondsFormat::Millis, true);

    Ok(document
        .select(&articles)
        .map(|article| {
            let item = Selection(vec![article]);
            let (date, _) = lexical_date(&item.find("div").next().find("span").text());
            NewsItem {
                title: item.find("h3").text(),
                media: item.find("div").find("div").find("div").next().text(),
                date,
                datetime: datetime.clone(),
                desc: item
                    .next()
                    .find("div")
                    .next()
                    .find("div")
                    .find("div")
                    .find("div")
                    .text(),
                link: item.attr("href"),
                img: item.find("img").attr("src"),
            }
        })
        .collect())
}

/// Splits `"source .. Mar 13, 2024"` style stamps; anything that does not parse stays as is.
fn lexical_date(raw: &str) -> (String, Option<NaiveDate>) {
    if raw.is_empty() {
        return (String::new(), None);
    }

    let tail = raw.rfind("..").map(|pos| &raw[pos + 2..]);
    let parsed = tail.and_then(|t| parse_date(t.trim()));
    let date = match (tail, parsed) {
        (Some(tail), Some(_)) => tail,
        _ => raw,
    };
    (date.strip_prefix(' ').unwrap_or(date).to_string(), parsed)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    ["%b %d, %Y", "%d %b %Y", "%B %d, %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<html><body><div id="search">
        <a jsname="YKoRaf" href="https://news.example.com/story">
          <div class="outer">
            <div class="inner">
              <div class="logo"></div>
              <div class="media">Daily Planet</div>
            </div>
          </div>
          <div class="meta"><h3>Big Story</h3><span>2 hours ago</span></div>
          <img src="https://img.example.com/1.jpg">
        </a>
        <div class="desc-wrap">
          <div>skip</div>
          <div><div><div><div>Story description here</div></div></div></div>
        </div>
        <a href="https://example.com/not-a-result">plain link</a>
    </div></body></html>"#;

    #[test]
    fn parses_result_markup() {
        let now = DateTime::parse_from_rfc3339("2024-03-20T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let items = parse_results(FIXTURE, now).unwrap();
        assert_eq!(items.len(), 1);

        let item = &items[0];
        assert_eq!(item.title, "Big Story");
        assert_eq!(item.media, "Daily Planet");
        assert_eq!(item.date, "2 hours ago");
        assert_eq!(item.datetime, "2024-03-13T12:00:00.000Z");
        assert_eq!(item.desc, "Story description here");
        assert_eq!(item.link, "https://news.example.com/story");
        assert_eq!(item.img, "https://img.example.com/1.jpg");
    }

    #[test]
    fn empty_page_has_no_results() {
        assert!(parse_results("<html></html>", Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn lexical_dates_keep_unparseable_text() {
        assert_eq!(lexical_date(""), (String::new(), None));
        assert_eq!(lexical_date("3 days ago").0, "3 days ago");

        let (date, parsed) = lexical_date("Reuters .. Mar 13, 2024");
        assert_eq!(date, "Mar 13, 2024");
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2024, 3, 13));

        assert_eq!(lexical_date("Reuters .. yesterday").0, "Reuters .. yesterday");
    }

    #[test]
    fn items_render_as_pretty_json() {
        let item = NewsItem {
            title: "t".into(),
            media: "m".into(),
            date: "d".into(),
            datetime: "2024-03-13T12:00:00.000Z".into(),
            desc: String::new(),
            link: "l".into(),
            img: String::new(),
        };
        let pretty = serde_json::to_string_pretty(&item).unwrap();
        assert!(pretty.starts_with("{\n  \"title\": \"t\""));
    }
}
