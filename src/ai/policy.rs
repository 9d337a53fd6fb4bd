//! Configurable content-policy filter applied to LLM output before it
//! becomes an outbound candidate (spec §4.10).

/// Deny-list check over the tenant's configured terms. Case-insensitive
/// substring match — the policy surface itself (term lists, categories) is
/// tenant configuration, not something this component invents.
pub fn violates_policy(content: &str, deny_list: &[String]) -> bool {
    let lowered = content.to_lowercase();
    deny_list.iter().any(|term| !term.is_empty() && lowered.contains(&term.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_denied_term_case_insensitively() {
        let deny = vec!["guarantee".to_string()];
        assert!(violates_policy("We GUARANTEE results", &deny));
    }

    #[test]
    fn clean_content_passes() {
        let deny = vec!["guarantee".to_string()];
        assert!(!violates_policy("Thanks for reaching out!", &deny));
    }

    #[test]
    fn empty_deny_list_never_blocks() {
        assert!(!violates_policy("anything at all", &[]));
    }
}
