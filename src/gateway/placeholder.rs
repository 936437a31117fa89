//! Apex placeholder page (§4.5): served when the bare `hostname` has no
//! `root_load_balancer` configured.

pub fn render(hostname: &str, subdomains: &[String]) -> String {
    let items: String = if subdomains.is_empty() {
        "<li>(no subdomains configured)</li>".to_string()
    } else {
        subdomains
            .iter()
            .map(|s| format!("<li>{s}.{hostname}</li>"))
            .collect()
    };

    format!(
        "<!DOCTYPE html><html><head><title>{hostname}</title></head>\
<body><h1>{hostname}</h1><p>Configured subdomains:</p><ul>{items}</ul></body></html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_configured_subdomains() {
        let html = render("developer.space", &["api".to_string(), "www".to_string()]);
        assert!(html.contains("api.developer.space"));
        assert!(html.contains("www.developer.space"));
    }

    #[test]
    fn empty_list_still_renders() {
        let html = render("developer.space", &[]);
        assert!(html.contains("no subdomains configured"));
    }
}
