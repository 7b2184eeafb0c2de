use crate::protocol::{ActionPayload, ElementDescriptor};
use crate::types::ActionKind;

const MAX_TEXT_CHARS: usize = 30;
const SHORT_TEXT_LIMIT: usize = 50;

pub fn derive_fragment(kind: ActionKind, payload: &ActionPayload) -> Option<String> {
    match kind {
        ActionKind::Goto | ActionKind::Navigation => payload
            .page_url
            .as_deref()
            .map(|url| format!("await page.goto({})", quote(url))),
        ActionKind::Press | ActionKind::Keypress => {
            let key = payload.key.as_deref()?;
            match payload.element.as_ref().and_then(locator) {
                Some(target) => Some(format!("await {target}.press({})", quote(key))),
                None => Some(format!("await page.keyboard.press({})", quote(key))),
            }
        }
        ActionKind::Click
        | ActionKind::Fill
        | ActionKind::Input
        | ActionKind::Select
        | ActionKind::Check
        | ActionKind::Uncheck
        | ActionKind::Hover => {
            let target = payload.element.as_ref().and_then(locator)?;
            let call = element_call(kind, payload)?;
            Some(format!("await {target}.{call}"))
        }
        ActionKind::Wait
        | ActionKind::Scroll
        | ActionKind::Screenshot
        | ActionKind::Load
        | ActionKind::Unknown => None,
    }
}

fn element_call(kind: ActionKind, payload: &ActionPayload) -> Option<String> {
    let call = match kind {
        ActionKind::Click => "click()".to_string(),
        ActionKind::Fill | ActionKind::Input => {
            format!("fill({})", quote(payload.input_value.as_deref().unwrap_or("")))
        }
        ActionKind::Select => {
            let option = payload
                .selected_text
                .as_deref()
                .or(payload.input_value.as_deref())?;
            format!("select_option({})", quote(option))
        }
        ActionKind::Check => "check()".to_string(),
        ActionKind::Uncheck => "uncheck()".to_string(),
        ActionKind::Hover => "hover()".to_string(),
        _ => return None,
    };
    Some(call)
}

/// Picks the most stable locator the descriptor supports.
pub fn locator(element: &ElementDescriptor) -> Option<String> {
    let text = element.text.as_deref().map(collapse_whitespace);
    let text = text.filter(|value| !value.is_empty());

    if let (Some(role), Some(text)) = (element.role.as_deref(), text.as_deref()) {
        return Some(format!(
            "page.get_by_role({}, name={})",
            quote(role),
            quote(&clip(text))
        ));
    }
    if let Some(text) = text.as_deref() {
        if text.chars().count() < SHORT_TEXT_LIMIT {
            return Some(format!("page.get_by_text({})", quote(&clip(text))));
        }
    }
    if let Some(placeholder) = element.placeholder.as_deref() {
        return Some(format!("page.get_by_placeholder({})", quote(placeholder)));
    }
    if let Some(id) = element.id.as_deref() {
        return Some(format!("page.locator({})", quote(&format!("#{id}"))));
    }
    if let Some(class) = element
        .class_name
        .as_deref()
        .and_then(|classes| classes.split_whitespace().next())
    {
        return Some(format!("page.locator({})", quote(&format!(".{class}"))));
    }
    if let Some(selector) = element.selector.as_deref() {
        return Some(format!("page.locator({})", quote(selector)));
    }
    element.tag_name.as_deref().map(|tag| {
        let tag = tag.to_ascii_lowercase();
        match element.input_type.as_deref() {
            Some(input_type) => format!("page.locator({})", quote(&format!("{tag}[type='{input_type}']"))),
            None => format!("page.locator({})", quote(&tag)),
        }
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clip(text: &str) -> String {
    text.chars().take(MAX_TEXT_CHARS).collect()
}

/// Double-quoted Python string literal.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
