//! Caption templates.

/// Substitute `{title}` and `{hashtags}` in a caption template.
pub fn render_caption(template: &str, title: &str, hashtags: &[String]) -> String {
    template
        .replace("{title}", title)
        .replace("{hashtags}", &hashtags.join(" "))
        .trim()
        .to_string()
}
