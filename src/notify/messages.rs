use crate::{notify::Email, provisioning::ResourceSpec};

pub fn verification(to: &str, link: &str, ttl_minutes: i64) -> Email {
    Email {
        to: to.to_string(),
        subject: "Confirm your registration".to_string(),
        body_text: format!(
            "Open this link within {ttl_minutes} minutes to choose your resources:\n{link}\n"
        ),
        body_html: format!(
            "<p>Open this link within {ttl_minutes} minutes to choose your resources: \
             <a href=\"{href}\">{href}</a></p>",
            href = escape_html(link)
        ),
    }
}

/// Summary of what a provisioning call created. Lists identifiers only.
pub fn provisioned(to: &str, created: &[ResourceSpec]) -> Email {
    let lines: Vec<String> = created.iter().map(ResourceSpec::describe).collect();
    Email {
        to: to.to_string(),
        subject: "Your resources are ready".to_string(),
        body_text: format!("Created resources:\n{}\n", lines.join("\n")),
        body_html: format!(
            "<p>Created resources:</p><ul>{}</ul>",
            lines
                .iter()
                .map(|l| format!("<li>{}</li>", escape_html(l)))
                .collect::<String>()
        ),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
