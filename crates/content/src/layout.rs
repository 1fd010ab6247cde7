//! Email layout around a generated body.

/// Wraps a message body in a minimal HTML document with a call-to-action
/// linking to the payment-update page.
pub fn render_email_html(body_html: &str, payment_update_url: Option<&str>, business_name: &str) -> String {
    let cta = payment_update_url
        .filter(|url| !url.trim().is_empty())
        .map(|url| {
            format!(
                r#"<p style="margin:32px 0;text-align:center"><a href="{url}" style="background:#111827;color:#ffffff;padding:12px 24px;border-radius:6px;text-decoration:none;font-weight:600">Update payment method</a></p>"#,
                url = escape_attr(url)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html><html><body style="font-family:-apple-system,Segoe UI,Helvetica,Arial,sans-serif;color:#111827;max-width:560px;margin:0 auto;padding:24px">{body_html}{cta}<p style="color:#6b7280;font-size:12px">Sent by {business}</p></body></html>"#,
        business = escape_text(business_name)
    )
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_payment_link_when_configured() {
        let html = render_email_html("<p>Hi</p>", Some("https://pay.example.com/u?i=1&x=\"2\""), "Acme");
        assert!(html.contains("<p>Hi</p>"));
        assert!(html.contains(r#"href="https://pay.example.com/u?i=1&amp;x=&quot;2&quot;""#));
        assert!(html.contains("Sent by Acme"));
    }

    #[test]
    fn omits_link_when_missing() {
        let html = render_email_html("<p>Hi</p>", None, "A & B");
        assert!(!html.contains("href"));
        assert!(html.contains("Sent by A &amp; B"));
    }
}
