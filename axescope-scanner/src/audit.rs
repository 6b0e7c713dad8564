// Static accessibility checks over a rendered document

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const SNIPPET_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Serious,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Serious => "serious",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
    pub details: String,
}

impl Violation {
    fn new(rule_id: &str, severity: Severity, details: String) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity,
            details,
        }
    }

    fn on_element(rule_id: &str, severity: Severity, message: &str, element: ElementRef) -> Self {
        Self::new(
            rule_id,
            severity,
            format!("{}: {}", message, snippet(&element.html())),
        )
    }
}

/// Evaluates the built-in rule set against one document.
#[derive(Debug, Default, Clone)]
pub struct Auditor;

impl Auditor {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, html: &str) -> Vec<Violation> {
        let document = Html::parse_document(html);
        let mut violations = Vec::new();

        check_html_lang(&document, &mut violations);
        check_document_title(&document, &mut violations);
        check_image_alt(&document, &mut violations);
        check_link_name(&document, &mut violations);
        check_button_name(&document, &mut violations);
        check_form_labels(&document, &mut violations);
        check_frame_title(&document, &mut violations);
        check_meta_viewport(&document, &mut violations);
        check_duplicate_ids(&document, &mut violations);

        violations
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

fn snippet(html: &str) -> String {
    let collapsed: String = html.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_LEN {
        collapsed
    } else {
        let cut: String = collapsed.chars().take(SNIPPET_LEN).collect();
        format!("{}...", cut)
    }
}

fn has_attr_text(element: &ElementRef, name: &str) -> bool {
    element
        .value()
        .attr(name)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

fn has_aria_name(element: &ElementRef) -> bool {
    has_attr_text(element, "aria-label")
        || has_attr_text(element, "aria-labelledby")
        || has_attr_text(element, "title")
}

fn has_visible_text(element: &ElementRef) -> bool {
    element.text().any(|t| !t.trim().is_empty())
}

fn is_hidden(element: &ElementRef) -> bool {
    element.value().attr("aria-hidden") == Some("true") || element.value().attr("hidden").is_some()
}

fn check_html_lang(document: &Html, violations: &mut Vec<Violation>) {
    let has_lang = document
        .select(&selector("html"))
        .next()
        .map(|html| has_attr_text(&html, "lang") || has_attr_text(&html, "xml:lang"))
        .unwrap_or(false);

    if !has_lang {
        violations.push(Violation::new(
            "html-has-lang",
            Severity::Serious,
            "<html> element does not have a lang attribute".to_string(),
        ));
    }
}

fn check_document_title(document: &Html, violations: &mut Vec<Violation>) {
    let has_title = document
        .select(&selector("title"))
        .any(|title| has_visible_text(&title));

    if !has_title {
        violations.push(Violation::new(
            "document-title",
            Severity::Serious,
            "Document does not have a non-empty <title> element".to_string(),
        ));
    }
}

fn check_image_alt(document: &Html, violations: &mut Vec<Violation>) {
    for img in document.select(&selector("img")) {
        let role = img.value().attr("role").unwrap_or("");
        if img.value().attr("alt").is_some()
            || has_aria_name(&img)
            || role == "presentation"
            || role == "none"
            || is_hidden(&img)
        {
            continue;
        }
        violations.push(Violation::on_element(
            "image-alt",
            Severity::Critical,
            "Image has no alternative text",
            img,
        ));
    }
}

fn check_link_name(document: &Html, violations: &mut Vec<Violation>) {
    let img_with_alt = selector("img[alt]");
    for link in document.select(&selector("a[href]")) {
        if is_hidden(&link) || has_visible_text(&link) || has_aria_name(&link) {
            continue;
        }
        let named_image = link
            .select(&img_with_alt)
            .any(|img| has_attr_text(&img, "alt"));
        if named_image {
            continue;
        }
        violations.push(Violation::on_element(
            "link-name",
            Severity::Serious,
            "Link has no discernible text",
            link,
        ));
    }
}

fn check_button_name(document: &Html, violations: &mut Vec<Violation>) {
    for button in document.select(&selector("button")) {
        if is_hidden(&button) || has_visible_text(&button) || has_aria_name(&button) {
            continue;
        }
        violations.push(Violation::on_element(
            "button-name",
            Severity::Critical,
            "Button has no discernible text",
            button,
        ));
    }

    for input in document.select(&selector(
        r#"input[type="button"], input[type="submit"], input[type="reset"]"#,
    )) {
        let input_type = input.value().attr("type").unwrap_or("");
        // Browsers supply a default label for submit and reset
        if input_type != "button" || has_attr_text(&input, "value") || has_aria_name(&input) {
            continue;
        }
        violations.push(Violation::on_element(
            "button-name",
            Severity::Critical,
            "Input button has no discernible text",
            input,
        ));
    }
}

fn check_form_labels(document: &Html, violations: &mut Vec<Violation>) {
    let labelled_ids: HashSet<&str> = document
        .select(&selector("label[for]"))
        .filter_map(|label| label.value().attr("for"))
        .collect();

    for field in document.select(&selector("input, select, textarea")) {
        let field_type = field.value().attr("type").unwrap_or("text");
        if matches!(
            field_type,
            "hidden" | "submit" | "button" | "reset" | "image"
        ) {
            continue;
        }
        if has_aria_name(&field) || (field_type == "search" && has_attr_text(&field, "placeholder"))
        {
            continue;
        }
        if let Some(id) = field.value().attr("id")
            && labelled_ids.contains(id)
        {
            continue;
        }
        let wrapped = field.ancestors().any(|node| {
            node.value()
                .as_element()
                .map(|el| el.name() == "label")
                .unwrap_or(false)
        });
        if wrapped {
            continue;
        }
        violations.push(Violation::on_element(
            "label",
            Severity::Critical,
            "Form element does not have a label",
            field,
        ));
    }
}

fn check_frame_title(document: &Html, violations: &mut Vec<Violation>) {
    for frame in document.select(&selector("iframe, frame")) {
        if has_aria_name(&frame) || is_hidden(&frame) {
            continue;
        }
        violations.push(Violation::on_element(
            "frame-title",
            Severity::Serious,
            "Frame does not have an accessible name",
            frame,
        ));
    }
}

fn check_meta_viewport(document: &Html, violations: &mut Vec<Violation>) {
    for meta in document.select(&selector(r#"meta[name="viewport"]"#)) {
        let content = meta
            .value()
            .attr("content")
            .unwrap_or("")
            .to_lowercase()
            .replace(' ', "");
        let params: HashMap<&str, &str> = content
            .split([',', ';'])
            .filter_map(|pair| pair.split_once('='))
            .collect();

        let no_zoom = matches!(params.get("user-scalable"), Some(&"no") | Some(&"0"));
        let capped = params
            .get("maximum-scale")
            .and_then(|v| v.parse::<f32>().ok())
            .map(|scale| scale < 2.0)
            .unwrap_or(false);

        if no_zoom || capped {
            violations.push(Violation::on_element(
                "meta-viewport",
                Severity::Critical,
                "Viewport disables text scaling and zooming",
                meta,
            ));
        }
    }
}

fn check_duplicate_ids(document: &Html, violations: &mut Vec<Violation>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for element in document.select(&selector("[id]")) {
        if let Some(id) = element.value().attr("id")
            && !id.is_empty()
        {
            *counts.entry(id).or_insert(0) += 1;
        }
    }

    let mut duplicates: Vec<(&str, usize)> =
        counts.into_iter().filter(|(_, count)| *count > 1).collect();
    duplicates.sort();
    for (id, count) in duplicates {
        violations.push(Violation::new(
            "duplicate-id",
            Severity::Minor,
            format!("id \"{}\" is used by {} elements", id, count),
        ));
    }
}
