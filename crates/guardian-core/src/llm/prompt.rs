use super::ContentKind;

const MAX_CONTENT_CHARS: usize = 4000;

const ANALYST_PREAMBLE: &str = "ACT AS A SENIOR CYBERSECURITY THREAT ANALYST. Perform a STRICT, ZERO-TRUST analysis of the provided content for phishing attempts, suspicious links, urgency tactics, credential harvesting and lookalike (homograph) domains. Keep the answer short and name exactly what is wrong.

AUDIT STEPS:
1. IDENTIFY THE TARGET: is the content pretending to be a known brand (bank, retailer, streaming or mail provider)?
2. DOMAIN AUDIT: compare any URL with the official domain of that brand; lookalikes such as 'hbfc.com' for 'hdfc.com' or 'micros0ft.com' for 'microsoft.com' are HIGH RISK.
3. LINGUISTIC ANALYSIS: look for panic inducers (\"Account suspended\", \"Action required within 1 hour\").
4. REQUEST AUDIT: does it ask for OTPs, passwords or KYC updates through an unofficial link?";

const QR_PREAMBLE: &str = "ACT AS A SPECIALIST IN QR THREAT INTELLIGENCE (QUISHING). Analyze the URL extracted from a QR code scan.

AUDIT STEPS:
1. DE-OBFUSCATION: a link shortener (bit.ly, tinyurl, t.co) hides the destination; flag MEDIUM RISK at least.
2. CREDENTIAL TRAP: a direct login path (/login, /sign-in, /auth) is HIGH RISK unless the domain is a verified top-tier entity.
3. REDIRECTION RISK: parameters such as 'url=' or 'dest=' suggest a redirect hop.
4. LOOKALIKES: apply strict homograph detection ('pay-pal.com' vs 'paypal.com').
5. CONTEXT: if the code claims to come from a brand, the domain must match the official one.";

const APP_PREAMBLE: &str = "ACT AS A MOBILE APPLICATION SECURITY AUDITOR. Review the Android package name and requested permissions below. Compare them with what an official app of that kind needs and flag excessive or dangerous permissions (SMS, accessibility, device admin, overlay, contacts, call logs, background location).";

const OUTPUT_FORMAT: &str = "OUTPUT FORMAT (JSON ONLY):
{\"risk\": \"LOW\" | \"MEDIUM\" | \"HIGH\", \"score\": 0-100 (100 is safest), \"reason\": \"technical explanation of the red flags\"}";

fn focus(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Email => "Focus on brand impersonation, generic greetings, mismatched link destinations, the sender address and tone.",
        ContentKind::Sms => "Focus on extreme urgency, link shorteners and OTP/KYC requests through links. Messages that only ask to visit a physical branch are lower risk but not automatically safe.",
        ContentKind::Url => "Perform a deep domain audit. Check for homograph attacks ('hbfc' vs 'hdfc') and character substitutions.",
        ContentKind::Qr => "Treat the destination as untrusted until proven otherwise.",
        ContentKind::App => "Explain which permissions are unexpected for this package.",
    }
}

/// Assemble the full instruction text sent to the model for one piece of content.
pub fn build_prompt(content: &str, kind: ContentKind) -> String {
    let preamble = match kind {
        ContentKind::Qr => QR_PREAMBLE,
        ContentKind::App => APP_PREAMBLE,
        ContentKind::Email | ContentKind::Sms | ContentKind::Url => ANALYST_PREAMBLE,
    };
    format!(
        "{preamble}\n\nTYPE-SPECIFIC FOCUS ({kind}): {focus}\n\n{OUTPUT_FORMAT}\n\n{kind} CONTENT TO ANALYZE: \"{content}\"\n",
        focus = focus(kind),
        content = truncate(content, MAX_CONTENT_CHARS),
    )
}

fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_prompt_mentions_homographs() {
        let prompt = build_prompt("https://hbfc.com", ContentKind::Url);
        assert!(prompt.contains("homograph"));
        assert!(prompt.contains("URL CONTENT TO ANALYZE: \"https://hbfc.com\""));
    }

    #[test]
    fn qr_prompt_uses_quishing_preamble() {
        let prompt = build_prompt("https://bit.ly/x", ContentKind::Qr);
        assert!(prompt.contains("QUISHING"));
        assert!(!prompt.contains("SENIOR CYBERSECURITY"));
    }

    #[test]
    fn every_prompt_requests_json() {
        for kind in [
            ContentKind::Email,
            ContentKind::Sms,
            ContentKind::Url,
            ContentKind::Qr,
            ContentKind::App,
        ] {
            assert!(build_prompt("x", kind).contains("JSON ONLY"), "{kind}");
        }
    }

    #[test]
    fn truncate_short_strings_return_same() {
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn truncate_long_strings_adds_ellipsis() {
        assert_eq!(truncate("abcdefghijklmnopqrstuvwxyz", 5), "abcde…");
    }
}
