//! Token substitution for review-prompt templates.

/// Values substituted into a message template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    pub content_title: String,
    pub content_type: String,
    pub quality_score: f64,
    pub content_url: String,
    pub created_date: String,
}

impl TemplateContext {
    fn value_for(&self, token: &str) -> Option<String> {
        match token {
            "contentTitle" => Some(self.content_title.clone()),
            "contentType" => Some(self.content_type.clone()),
            "qualityScore" => Some(format!("{:.2}", self.quality_score)),
            "contentUrl" => Some(self.content_url.clone()),
            "createdDate" => Some(self.created_date.clone()),
            _ => None,
        }
    }
}

/// Renders a template against a context.
///
/// Known `{token}` placeholders are substituted; unknown ones are left as
/// literal text so a template typo degrades visibly instead of failing the
/// notification. Rendering never errors.
pub fn render_template(template: &str, context: &TemplateContext) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        match after_open.find('}') {
            Some(close) => {
                let token = &after_open[..close];
                match context.value_for(token) {
                    Some(value) => rendered.push_str(&value),
                    None => {
                        rendered.push('{');
                        rendered.push_str(token);
                        rendered.push('}');
                    }
                }
                rest = &after_open[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after_open;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}
