pub const ARGUMENTS_PREVIEW_CHARS: usize = 200;
pub const RESULT_PREVIEW_CHARS: usize = 500;

const ELLIPSIS: &str = "...";

/// Keeps the first `max_chars` characters, appending `...` when anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &text[..cut]),
        None => text.to_owned(),
    }
}

/// Pretty-printed tool arguments; raw text when the arguments are not JSON.
pub fn arguments_preview(args: &str) -> String {
    let pretty = serde_json::from_str::<serde_json::Value>(args)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| args.to_owned());
    truncate_chars(&pretty, ARGUMENTS_PREVIEW_CHARS)
}

pub fn result_preview(result: &str) -> String {
    truncate_chars(result, RESULT_PREVIEW_CHARS)
}

#[cfg(test)]
mod tests {
    use super::{arguments_preview, result_preview, truncate_chars};

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé...");
        assert_eq!(truncate_chars("short", 5), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn json_arguments_are_pretty_printed() {
        assert_eq!(
            arguments_preview(r#"{"path":"a.txt"}"#),
            "{\n  \"path\": \"a.txt\"\n}"
        );
        assert_eq!(arguments_preview("not json"), "not json");
    }

    #[test]
    fn long_results_are_cut_at_five_hundred_chars() {
        let preview = result_preview(&"x".repeat(501));
        assert_eq!(preview.len(), 503);
        assert!(preview.ends_with("..."));
        assert_eq!(result_preview(&"y".repeat(500)).len(), 500);
    }
}
