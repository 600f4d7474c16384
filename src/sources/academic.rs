//! arXiv OAI-PMH harvester.
//!
//! Harvests `ListRecords` per configured set inside the collection window and
//! keeps the records whose title or abstract mentions one of the query words.
//! The repository has no full-text search over OAI-PMH, so the keyword match
//! happens here.
//!
//! # Protocol
//!
//! - First request of a set: `verb`, `metadataPrefix`, `set`, `from`, `until`
//! - Continuations: `verb` and `resumptionToken` only
//! - An absent or empty `resumptionToken` ends the set
//! - `<error code="noRecordsMatch">` ends the set cleanly; other codes abort
//!   the set but keep what was already accepted
//!
//! The rich `arXiv` metadata schema is requested first. When the repository
//! answers `cannotDisseminateFormat`, the set is retried once with `oai_dc`.

use super::SourceAdapter;
use crate::config::ArxivConfig;
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::models::{DateWindow, Item, SourceKind};
use crate::utils::{collapse_whitespace, truncate_chars};
use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const FALLBACK_FORMAT: &str = "oai_dc";
pub const SOURCE_NAME: &str = "arXiv.org";
const MAX_AUTHORS: usize = 5;
const SNIPPET_CHARS: usize = 500;

/// One harvested record, schema independent.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct OaiRecord {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub created: String,
    pub categories: String,
    pub authors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OaiError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub(crate) struct OaiPage {
    pub records: Vec<OaiRecord>,
    pub resumption_token: Option<String>,
    pub error: Option<OaiError>,
}

impl OaiRecord {
    fn matches(&self, keywords: &[String]) -> bool {
        if keywords.is_empty() {
            return true;
        }
        let haystack = format!("{} {}", self.title, self.abstract_text).to_lowercase();
        keywords.iter().any(|k| haystack.contains(k.as_str()))
    }

    fn into_item(self) -> Item {
        let url = if self.id.starts_with("http://") || self.id.starts_with("https://") {
            self.id.clone()
        } else {
            format!("https://arxiv.org/abs/{}", self.id)
        };
        let mut item = Item::new(
            collapse_whitespace(&self.title),
            url,
            truncate_chars(&collapse_whitespace(&self.abstract_text), SNIPPET_CHARS),
            SourceKind::Academic,
            SOURCE_NAME,
            self.created,
        );
        item.authors = self.authors.into_iter().take(MAX_AUTHORS).collect();
        item.categories = Some(self.categories).filter(|c| !c.is_empty());
        item
    }
}

fn local(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// Parse one `ListRecords` response.
///
/// Namespaces are ignored; elements are matched by local name. Both the
/// `arXiv` and `oai_dc` metadata schemas are understood.
pub(crate) fn parse_list_records(xml: &str) -> Result<OaiPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = OaiPage::default();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut current: Option<OaiRecord> = None;
    let mut forenames = String::new();
    let mut keyname = String::new();
    let mut error_code = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local(e.local_name().as_ref());
                match name.as_str() {
                    "record" => current = Some(OaiRecord::default()),
                    "author" => {
                        forenames.clear();
                        keyname.clear();
                    }
                    "error" => error_code = attr_value(&e, "code")?,
                    _ => {}
                }
                stack.push(name);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"error" {
                    page.error = Some(OaiError {
                        code: attr_value(&e, "code")?,
                        message: String::new(),
                    });
                }
            }
            Ok(Event::Text(t)) => {
                let chunk = t.unescape().map_err(|e| Error::Xml(e.to_string()))?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(e)) => {
                let name = local(e.local_name().as_ref());
                let value = text.trim().to_string();
                text.clear();
                stack.pop();

                let in_arxiv = stack.iter().any(|n| n == "arXiv");
                let in_dc = stack.iter().any(|n| n == "dc");

                match name.as_str() {
                    "record" => {
                        if let Some(rec) = current.take().filter(|r| !r.title.is_empty()) {
                            page.records.push(rec);
                        }
                        continue;
                    }
                    "resumptionToken" => {
                        page.resumption_token = Some(value).filter(|v| !v.is_empty());
                        continue;
                    }
                    "error" => {
                        page.error = Some(OaiError {
                            code: std::mem::take(&mut error_code),
                            message: value,
                        });
                        continue;
                    }
                    _ => {}
                }

                let Some(rec) = current.as_mut() else { continue };
                if in_arxiv {
                    match name.as_str() {
                        "id" => rec.id = value,
                        "title" => rec.title = value,
                        "abstract" => rec.abstract_text = value,
                        "created" => rec.created = value,
                        "categories" => rec.categories = value,
                        "forenames" => forenames = value,
                        "keyname" => keyname = value,
                        "author" => {
                            let full = format!("{forenames} {keyname}").trim().to_string();
                            if !full.is_empty() {
                                rec.authors.push(full);
                            }
                        }
                        _ => {}
                    }
                } else if in_dc {
                    let slot = match name.as_str() {
                        "title" => &mut rec.title,
                        "description" => &mut rec.abstract_text,
                        "identifier" => &mut rec.id,
                        "date" => &mut rec.created,
                        "creator" => {
                            if !value.is_empty() {
                                rec.authors.push(value);
                            }
                            continue;
                        }
                        _ => continue,
                    };
                    // dc repeats fields; the first occurrence wins
                    if slot.is_empty() {
                        *slot = value;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Xml(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if !stack.is_empty() {
        return Err(Error::Malformed(format!("unclosed element <{}>", stack.join("/"))));
    }
    Ok(page)
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &str) -> Result<String> {
    match e.try_get_attribute(key) {
        Ok(Some(attr)) => attr
            .unescape_value()
            .map(|v| v.into_owned())
            .map_err(|err| Error::Xml(err.to_string())),
        Ok(None) => Ok(String::new()),
        Err(err) => Err(Error::Xml(err.to_string())),
    }
}

pub struct AcademicAdapter {
    transport: Arc<dyn Transport>,
    endpoint: String,
    metadata_format: String,
    sets: Vec<String>,
    max_records: usize,
    page_delay: Duration,
}

impl AcademicAdapter {
    pub fn new(transport: Arc<dyn Transport>, config: &ArxivConfig) -> Self {
        Self {
            transport,
            endpoint: config.endpoint.clone(),
            metadata_format: config.metadata_format.clone(),
            sets: config.default_sets.clone(),
            max_records: config.max_records,
            page_delay: Duration::from_millis(config.page_delay_ms),
        }
    }

    async fn pause(&self, requests: &mut usize) {
        if *requests > 0 && !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        *requests += 1;
    }

    #[instrument(level = "debug", skip(self, keywords, window, requests))]
    async fn harvest_set(
        &self,
        set: &str,
        keywords: &[String],
        window: &DateWindow,
        requests: &mut usize,
    ) -> Result<Vec<Item>> {
        let mut prefix = self.metadata_format.clone();
        let mut token: Option<String> = None;
        let mut first_page = true;
        let mut items = Vec::new();

        loop {
            self.pause(requests).await;
            let params: Vec<(&str, String)> = match &token {
                Some(t) => vec![("verb", "ListRecords".to_string()), ("resumptionToken", t.clone())],
                None => vec![
                    ("verb", "ListRecords".to_string()),
                    ("metadataPrefix", prefix.clone()),
                    ("set", set.to_string()),
                    ("from", window.start_date()),
                    ("until", window.end_date()),
                ],
            };
            let body = self.transport.get(&self.endpoint, &params).await?;
            let page = parse_list_records(&body)?;

            if let Some(err) = page.error {
                match err.code.as_str() {
                    "noRecordsMatch" => debug!("No records in window"),
                    "cannotDisseminateFormat" if first_page && prefix != FALLBACK_FORMAT => {
                        warn!(%prefix, "Metadata format refused; retrying with oai_dc");
                        prefix = FALLBACK_FORMAT.to_string();
                        continue;
                    }
                    code => warn!(code, message = %err.message, kept = items.len(), "OAI-PMH error; abandoning set"),
                }
                break;
            }
            first_page = false;

            let seen = page.records.len();
            items.extend(
                page.records
                    .into_iter()
                    .filter(|r| r.matches(keywords))
                    .take(self.max_records - items.len())
                    .map(OaiRecord::into_item),
            );
            debug!(seen, accepted = items.len(), "Harvested page");

            if items.len() >= self.max_records {
                break;
            }
            match page.resumption_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }

        Ok(items)
    }

    async fn try_fetch(&self, query: &str, window: &DateWindow) -> Result<Vec<Item>> {
        let keywords: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
        let mut requests = 0usize;
        let mut items = Vec::new();
        for set in &self.sets {
            let found = self.harvest_set(set, &keywords, window, &mut requests).await?;
            info!(set = %set, count = found.len(), "Harvested set");
            items.extend(found);
        }
        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for AcademicAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Academic
    }

    #[instrument(level = "info", skip_all, fields(%query))]
    async fn fetch(&self, query: &str, window: &DateWindow) -> Vec<Item> {
        if self.max_records == 0 {
            return Vec::new();
        }
        match self.try_fetch(query, window).await {
            Ok(items) => {
                info!(count = items.len(), "Collected academic records");
                items
            }
            Err(e) => {
                error!(error = %e, "Academic harvest failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedTransport;
    use chrono::NaiveDate;

    fn arxiv_record(id: &str, title: &str, abstract_text: &str) -> String {
        format!(
            r#"<record>
  <header><identifier>oai:arXiv.org:{id}</identifier><datestamp>2025-06-10</datestamp></header>
  <metadata>
    <arXiv xmlns="http://arxiv.org/OAI/arXiv/">
      <id>{id}</id>
      <created>2025-06-09</created>
      <authors>
        <author><keyname>Lovelace</keyname><forenames>Ada</forenames></author>
        <author><keyname>Turing</keyname><forenames>Alan M.</forenames></author>
      </authors>
      <title>{title}</title>
      <categories>cs.CL cs.AI</categories>
      <abstract>{abstract_text}</abstract>
    </arXiv>
  </metadata>
</record>"#
        )
    }

    fn list_records(records: &[String], token: Option<&str>) -> String {
        let token = match token {
            Some(t) => format!(r#"<resumptionToken cursor="0" completeListSize="4">{t}</resumptionToken>"#),
            None => r#"<resumptionToken cursor="2" completeListSize="4"/>"#.to_string(),
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2025-06-15T00:00:00Z</responseDate>
  <request verb="ListRecords">https://oaipmh.arxiv.org/oai</request>
  <ListRecords>{}{token}</ListRecords>
</OAI-PMH>"#,
            records.join("\n")
        )
    }

    fn oai_error(code: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <request verb="ListRecords">https://oaipmh.arxiv.org/oai</request>
  <error code="{code}">something about {code}</error>
</OAI-PMH>"#
        )
    }

    const DC_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <ListRecords>
    <record>
      <header><identifier>oai:arXiv.org:2506.00002</identifier></header>
      <metadata>
        <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">
          <dc:title>Sparse   attention
            at scale</dc:title>
          <dc:creator>Hopper, Grace</dc:creator>
          <dc:creator>Knuth, Donald</dc:creator>
          <dc:description>We study &lt;b&gt;sparse&lt;/b&gt; attention.</dc:description>
          <dc:description>Comment: 12 pages</dc:description>
          <dc:date>2025-06-11</dc:date>
          <dc:identifier>http://arxiv.org/abs/2506.00002v1</dc:identifier>
          <dc:identifier>doi:10.1000/xyz</dc:identifier>
        </oai_dc:dc>
      </metadata>
    </record>
  </ListRecords>
</OAI-PMH>"#;

    fn window() -> DateWindow {
        let d = |day| {
            NaiveDate::from_ymd_opt(2025, 6, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        };
        DateWindow::new(d(8), d(15))
    }

    fn adapter(transport: Arc<ScriptedTransport>, max_records: usize) -> AcademicAdapter {
        let config = ArxivConfig {
            max_records,
            page_delay_ms: 0,
            ..ArxivConfig::default()
        };
        AcademicAdapter::new(transport, &config)
    }

    #[test]
    fn test_parse_arxiv_schema() {
        let xml = list_records(
            &[arxiv_record("2506.00001", "Language  models\n are fun", "An abstract.")],
            Some("tok-1"),
        );
        let page = parse_list_records(&xml).unwrap();
        assert_eq!(page.resumption_token.as_deref(), Some("tok-1"));
        assert!(page.error.is_none());
        let rec = &page.records[0];
        assert_eq!(rec.id, "2506.00001");
        assert_eq!(rec.created, "2025-06-09");
        assert_eq!(rec.categories, "cs.CL cs.AI");
        assert_eq!(rec.authors, vec!["Ada Lovelace", "Alan M. Turing"]);

        let item = rec.clone().into_item();
        assert_eq!(item.title, "Language models are fun");
        assert_eq!(item.url, "https://arxiv.org/abs/2506.00001");
        assert_eq!(item.source_name, "arXiv.org");
        assert_eq!(item.categories.as_deref(), Some("cs.CL cs.AI"));
    }

    #[test]
    fn test_parse_dc_schema_first_occurrence_wins() {
        let page = parse_list_records(DC_PAGE).unwrap();
        assert_eq!(page.resumption_token, None);
        let rec = &page.records[0];
        assert_eq!(rec.abstract_text, "We study <b>sparse</b> attention.");
        assert_eq!(rec.id, "http://arxiv.org/abs/2506.00002v1");
        assert_eq!(rec.authors, vec!["Hopper, Grace", "Knuth, Donald"]);

        let item = rec.clone().into_item();
        assert_eq!(item.title, "Sparse attention at scale");
        assert_eq!(item.url, "http://arxiv.org/abs/2506.00002v1");
        assert_eq!(item.date_published, "2025-06-11");
    }

    #[test]
    fn test_parse_error_code() {
        let page = parse_list_records(&oai_error("badResumptionToken")).unwrap();
        let err = page.error.unwrap();
        assert_eq!(err.code, "badResumptionToken");
        assert!(err.message.contains("badResumptionToken"));
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(parse_list_records("<OAI-PMH><ListRecords><record>").is_err());
    }

    #[test]
    fn test_snippet_truncated_and_authors_capped() {
        let rec = OaiRecord {
            id: "1".into(),
            title: "t".into(),
            abstract_text: "x".repeat(800),
            authors: (0..8).map(|i| format!("A{i}")).collect(),
            ..Default::default()
        };
        let item = rec.into_item();
        assert_eq!(item.snippet.chars().count(), 503);
        assert!(item.snippet.ends_with("..."));
        assert_eq!(item.authors.len(), 5);
        assert_eq!(item.categories, None);
    }

    #[test]
    fn test_keyword_filter() {
        let rec = OaiRecord {
            title: "Graph Neural Networks".into(),
            abstract_text: "We propose a transformer.".into(),
            ..Default::default()
        };
        assert!(rec.matches(&["transformer".into()]));
        assert!(rec.matches(&["quantum".into(), "graph".into()]));
        assert!(!rec.matches(&["quantum".into()]));
        assert!(rec.matches(&[]));
    }

    #[tokio::test]
    async fn test_resumption_makes_exactly_two_requests() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_body(list_records(
                &[
                    arxiv_record("2506.00001", "LLM agents", "about agents"),
                    arxiv_record("2506.00003", "Protein folding", "biology"),
                ],
                Some("tok-1"),
            ))
            .push_body(list_records(
                &[arxiv_record("2506.00004", "Scaling LLM inference", "fast")],
                None,
            ));

        let items = adapter(transport.clone(), 100).fetch("LLM", &window()).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://arxiv.org/abs/2506.00001");

        let reqs = transport.requests();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].param("metadataPrefix"), Some("arXiv"));
        assert_eq!(reqs[0].param("set"), Some("cs"));
        assert_eq!(reqs[0].param("from"), Some("2025-06-08"));
        assert_eq!(reqs[0].param("until"), Some("2025-06-15"));
        assert_eq!(reqs[1].param("resumptionToken"), Some("tok-1"));
        assert_eq!(reqs[1].param("set"), None);
        assert_eq!(reqs[1].param("metadataPrefix"), None);
    }

    #[tokio::test]
    async fn test_record_cap_stops_harvest() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_body(list_records(
            &[
                arxiv_record("1", "LLM a", ""),
                arxiv_record("2", "LLM b", ""),
                arxiv_record("3", "LLM c", ""),
            ],
            Some("more"),
        ));
        let items = adapter(transport.clone(), 2).fetch("llm", &window()).await;
        assert_eq!(items.len(), 2);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_format_fallback_to_oai_dc() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_body(oai_error("cannotDisseminateFormat"))
            .push_body(DC_PAGE);
        let items = adapter(transport.clone(), 100).fetch("sparse", &window()).await;
        assert_eq!(items.len(), 1);

        let reqs = transport.requests();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].param("metadataPrefix"), Some("arXiv"));
        assert_eq!(reqs[1].param("metadataPrefix"), Some("oai_dc"));
    }

    #[tokio::test]
    async fn test_no_records_match_is_clean_end() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_body(oai_error("noRecordsMatch"));
        let items = adapter(transport.clone(), 100).fetch("llm", &window()).await;
        assert!(items.is_empty());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_other_error_keeps_accepted_items() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_body(list_records(&[arxiv_record("1", "LLM a", "")], Some("t")))
            .push_body(oai_error("badResumptionToken"));
        let items = adapter(transport.clone(), 100).fetch("llm", &window()).await;
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_yields_empty() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_body(list_records(&[arxiv_record("1", "LLM a", "")], Some("t")))
            .push_error(502);
        let items = adapter(transport, 100).fetch("llm", &window()).await;
        assert!(items.is_empty());
    }
}
