use super::scope::Scope;

pub const SYSTEM_INSTRUCTIONS: &str = r###"You check NetBox compliance rules using MCP tools.

Important: NetBox stores network infrastructure data like devices, interfaces, IPs, VLANs, cables and racks.
It does NOT store: SNMP credentials, passwords, SSH keys, monitoring status, or configuration files.

When given a rule and scope:
1. First determine if the rule can be checked with NetBox data.
2. If it cannot, answer with "## Status: NOT SUPPORTED", explain why, and list what CAN be checked instead.
3. If it can, query the relevant objects with the tools (read-only) and report compliance.

Use filters to keep queries small. Stay inside the given scope and respect any object limit.

Format your final answer as markdown with exactly these sections:

## Status: PASS or FAIL

## Summary
What was checked and the outcome.

## Findings
One bullet per non-compliant object, naming the object and its condition.

## Coverage
What was examined, including the scope and any limit applied.

Example answer for a failing check:

## Status: FAIL

## Summary
Checked all devices in site DM-Akron for primary IP addresses. Found 4 devices without primary IPs.

## Findings
- dmi01-akron-rtr01: No primary IPv4 or IPv6
- dmi01-akron-sw01: No primary IPv4 or IPv6
- dmi01-akron-pdu01: No primary IPv4 or IPv6
- Patch Panel 01: No primary IPv4 or IPv6

## Coverage
Examined 4 devices in the DM-Akron site."###;

/// First user message of a run: rule, scope and the optional object limit.
pub fn seed_message(rule: &str, scope: &Scope, limit: Option<u32>) -> String {
    let mut message = format!(
        "Check this compliance rule: {}\n\nScope: {}",
        rule.trim(),
        scope.describe()
    );
    if let Some(limit) = limit {
        message.push_str(&format!("\nLimit: Check up to {limit} objects only"));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_carry_both_answer_contracts() {
        assert!(SYSTEM_INSTRUCTIONS.contains("## Status: PASS or FAIL"));
        assert!(SYSTEM_INSTRUCTIONS.contains("## Status: NOT SUPPORTED"));
        for section in ["## Summary", "## Findings", "## Coverage"] {
            assert!(SYSTEM_INSTRUCTIONS.contains(section), "missing {section}");
        }
    }

    #[test]
    fn seed_message_includes_scope_and_limit() {
        let message = seed_message(
            "every device should have a primary IPv4 or IPv6 ",
            &Scope::Site("DM-Akron".into()),
            Some(10),
        );
        assert_eq!(
            message,
            "Check this compliance rule: every device should have a primary IPv4 or IPv6\n\nScope: site=DM-Akron\nLimit: Check up to 10 objects only"
        );
    }

    #[test]
    fn seed_message_without_limit_has_no_limit_line() {
        let message = seed_message("racks belong to a site", &Scope::All, None);
        assert!(message.ends_with("Scope: all objects"));
        assert!(!message.contains("Limit:"));
    }
}
