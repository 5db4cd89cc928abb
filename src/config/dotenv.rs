use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub(crate) fn load_dotenv_map(work_dir: &Path) -> Result<HashMap<String, String>, std::io::Error> {
    let path = work_dir.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(parse_dotenv_content(raw.as_str()))
}

pub(crate) fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    raw.lines().filter_map(parse_dotenv_line).collect()
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").map_or(line, str::trim_start);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), unquote_value(value.trim())))
}

fn unquote_value(value: &str) -> String {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        return value[1..value.len() - 1].to_string();
    }
    match value.split_once(" #") {
        Some((before_comment, _)) => before_comment.trim_end().to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_dotenv_content;

    #[test]
    fn parses_exports_quotes_and_comments() {
        let parsed = parse_dotenv_content(
            r#"
# provider credentials
export REPLICATE_API_TOKEN="r8_abcdefghijklmnop"
UPSCALE_BACKEND_BIND = 127.0.0.1:5001 # local only
UPSCALE_MODEL='nightmareai/real-esrgan'
=missing-key
not a pair
"#,
        );

        assert_eq!(parsed.len(), 3);
        assert_eq!(
            parsed.get("REPLICATE_API_TOKEN").map(String::as_str),
            Some("r8_abcdefghijklmnop")
        );
        assert_eq!(
            parsed.get("UPSCALE_BACKEND_BIND").map(String::as_str),
            Some("127.0.0.1:5001")
        );
        assert_eq!(
            parsed.get("UPSCALE_MODEL").map(String::as_str),
            Some("nightmareai/real-esrgan")
        );
    }
}
