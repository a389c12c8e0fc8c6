//! AI provider catalog and detection.
//!
//! The registry is a static list of known AI service providers, each with
//! domain patterns (a leading `*.` matches any subdomain) and API path
//! fragments. Detection runs two passes: an exact domain+path pass, then a
//! path-only fallback so that proxied calls to gateways and mirrors that
//! reuse a well-known API shape are still attributed.

/// A catalog entry for an AI service provider.
#[derive(Debug, PartialEq, Eq)]
pub struct AiProvider {
    pub name: &'static str,
    /// Ordered domain patterns; `*.` prefix matches any subdomain.
    pub domains: &'static [&'static str],
    /// Ordered path fragments; a request matches when its path contains one.
    pub api_patterns: &'static [&'static str],
}

/// Known AI providers, in match-priority order.
pub const REGISTRY: &[AiProvider] = &[
    // LLM providers
    AiProvider {
        name: "OpenAI",
        domains: &["api.openai.com"],
        api_patterns: &[
            "/v1/chat/completions",
            "/v1/completions",
            "/v1/embeddings",
            "/v1/images/generations",
            "/v1/audio/transcriptions",
            "/v1/audio/translations",
            "/v1/moderations",
        ],
    },
    AiProvider {
        name: "Anthropic",
        domains: &["api.anthropic.com"],
        api_patterns: &["/v1/messages", "/v1/complete"],
    },
    AiProvider {
        name: "Google AI",
        domains: &[
            "generativelanguage.googleapis.com",
            "aiplatform.googleapis.com",
        ],
        api_patterns: &["/v1beta/models", "/v1/projects"],
    },
    AiProvider {
        name: "Cohere",
        domains: &["api.cohere.ai"],
        api_patterns: &["/v1/generate", "/v1/embed", "/v1/classify", "/v1/summarize"],
    },
    AiProvider {
        name: "Together AI",
        domains: &["api.together.ai"],
        api_patterns: &[
            "/v1/chat/completions",
            "/v1/completions",
            "/v1/embeddings",
            "/inference",
        ],
    },
    AiProvider {
        name: "Groq",
        domains: &["api.groq.com"],
        api_patterns: &["/openai/v1/chat/completions"],
    },
    AiProvider {
        name: "Hugging Face",
        domains: &["api-inference.huggingface.co"],
        api_patterns: &["/models/"],
    },
    AiProvider {
        name: "Azure OpenAI",
        domains: &["*.openai.azure.com"],
        api_patterns: &["/openai/deployments/"],
    },
    // Speech-to-text providers
    AiProvider {
        name: "Deepgram",
        domains: &["api.deepgram.com"],
        api_patterns: &["/v1/listen", "/v1/speak"],
    },
    AiProvider {
        name: "AssemblyAI",
        domains: &["api.assemblyai.com"],
        api_patterns: &["/v2/transcript", "/v2/realtime"],
    },
    // Text-to-speech providers
    AiProvider {
        name: "ElevenLabs",
        domains: &["api.elevenlabs.io"],
        api_patterns: &["/v1/text-to-speech", "/v1/speech-synthesis"],
    },
    AiProvider {
        name: "PlayHT",
        domains: &["api.play.ht"],
        api_patterns: &["/api/v2/tts", "/api/v1/convert"],
    },
    AiProvider {
        name: "Amazon Polly",
        domains: &["polly.*.amazonaws.com"],
        api_patterns: &["/v1/speech"],
    },
    AiProvider {
        name: "Azure TTS",
        domains: &["*.cognitiveservices.azure.com"],
        api_patterns: &["/sts/v1.0/issueToken", "/cognitiveservices/v1"],
    },
    AiProvider {
        name: "Dubverse",
        domains: &["api.dubverse.ai"],
        api_patterns: &["/v1/text-to-speech", "/v1/dubbing"],
    },
    AiProvider {
        name: "Sarvam AI",
        domains: &["api.sarvam.ai"],
        api_patterns: &["/v1/voice/tts", "/v1/llm/o/v1/chat/completions"],
    },
    // Phone / streaming service providers
    AiProvider {
        name: "Twilio",
        domains: &["api.twilio.com"],
        api_patterns: &["/2010-04-01/Accounts"],
    },
    AiProvider {
        name: "Plivo",
        domains: &["api.plivo.com"],
        api_patterns: &["/v1/Account"],
    },
    AiProvider {
        name: "Vonage",
        domains: &["api.nexmo.com", "api.vonage.com"],
        api_patterns: &["/v1/calls", "/v1/voice"],
    },
    AiProvider {
        name: "Daily",
        domains: &["api.daily.co"],
        api_patterns: &["/v1/rooms", "/v1/meetings"],
    },
    AiProvider {
        name: "100ms",
        domains: &["api.100ms.live"],
        api_patterns: &["/v2/rooms", "/v2/sessions"],
    },
    // Local and test services
    AiProvider {
        name: "Local AI Services",
        domains: &["localhost", "127.0.0.1", "0.0.0.0"],
        api_patterns: &[
            "/v1/chat/completions",
            "/v1/completions",
            "/v1/embeddings",
            "/v1/models",
            "/chat",
            "/embed",
        ],
    },
];

/// Detect the AI provider for a request.
///
/// Pass 1 requires a domain match and a path match on the same entry. Pass 2
/// matches by path alone, so traffic explicitly routed through the proxy is
/// attributed even when the host is a gateway the catalog does not list.
/// Returns `None` for non-AI traffic.
pub fn detect(host: &str, path: &str) -> Option<&'static AiProvider> {
    let host = normalize_host(host);

    REGISTRY
        .iter()
        .find(|p| {
            p.domains.iter().any(|d| domain_matches(d, &host))
                && p.api_patterns.iter().any(|a| path.contains(a))
        })
        .or_else(|| {
            REGISTRY
                .iter()
                .find(|p| p.api_patterns.iter().any(|a| path.contains(a)))
        })
}

/// Lowercase a host and strip any port suffix.
pub(crate) fn normalize_host(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    if let Some(end) = host.strip_prefix('[').and_then(|h| h.find(']')) {
        // Bracketed IPv6 literal
        return host[1..=end].to_string();
    }
    match host.split_once(':') {
        Some((h, _)) => h.to_string(),
        None => host,
    }
}

/// Match a single domain pattern against a normalized host.
fn domain_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => host.ends_with(suffix),
        None => host == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Domain matching ----------------------------------------------------

    #[test]
    fn test_domain_exact_match() {
        assert!(domain_matches("api.openai.com", "api.openai.com"));
        assert!(!domain_matches("api.openai.com", "evil-api.openai.com.attacker.io"));
    }

    #[test]
    fn test_domain_match_case_insensitive() {
        assert!(domain_matches("api.openai.com", &normalize_host("API.OpenAI.com")));
    }

    #[test]
    fn test_domain_wildcard_match() {
        assert!(domain_matches("*.openai.azure.com", "myinstance.openai.azure.com"));
        assert!(!domain_matches("*.openai.azure.com", "openai.example.com"));
    }

    #[test]
    fn test_normalize_host_strips_port() {
        assert_eq!(normalize_host("localhost:5002"), "localhost");
        assert_eq!(normalize_host("api.openai.com:443"), "api.openai.com");
        assert_eq!(normalize_host("api.openai.com"), "api.openai.com");
    }

    // ---- Detection ----------------------------------------------------------

    #[test]
    fn test_detect_openai() {
        let provider = detect("api.openai.com", "/v1/chat/completions").unwrap();
        assert_eq!(provider.name, "OpenAI");
    }

    #[test]
    fn test_detect_anthropic() {
        let provider = detect("api.anthropic.com", "/v1/messages").unwrap();
        assert_eq!(provider.name, "Anthropic");
    }

    #[test]
    fn test_detect_azure_wildcard() {
        let provider = detect(
            "myinstance.openai.azure.com",
            "/openai/deployments/gpt-4/chat/completions",
        )
        .unwrap();
        assert_eq!(provider.name, "Azure OpenAI");
    }

    #[test]
    fn test_detect_localhost_with_port() {
        let provider = detect("localhost:5002", "/v1/chat/completions").unwrap();
        assert_eq!(provider.name, "Local AI Services");
    }

    #[test]
    fn test_detect_loopback_addresses() {
        assert!(detect("127.0.0.1:8000", "/v1/embeddings").is_some());
        assert!(detect("0.0.0.0", "/chat").is_some());
    }

    #[test]
    fn test_detect_non_ai_traffic() {
        assert!(detect("example.com", "/index.html").is_none());
        assert!(detect("api.openai.com", "/robots.txt").is_none());
    }

    #[test]
    fn test_detect_path_fallback_for_unlisted_host() {
        // A gateway host serving the Anthropic API shape is still attributed.
        let provider = detect("api.openai.com", "/v1/messages").unwrap();
        assert_eq!(provider.name, "Anthropic");

        let provider = detect("llm-gateway.internal", "/v1/chat/completions").unwrap();
        assert_eq!(provider.name, "OpenAI");
    }

    #[test]
    fn test_detect_path_with_tenant_prefix() {
        // Loose containment tolerates versioning/tenant prefixes.
        let provider = detect("api.openai.com", "/tenant-7/v1/chat/completions").unwrap();
        assert_eq!(provider.name, "OpenAI");
    }

    #[test]
    fn test_registry_entries_are_well_formed() {
        for provider in REGISTRY {
            assert!(!provider.name.is_empty());
            assert!(!provider.domains.is_empty());
            assert!(!provider.api_patterns.is_empty());
        }
    }
}
