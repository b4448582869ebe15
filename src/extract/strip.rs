//! Last-resort tag stripping for markup the structured walk cannot use

/// Elements whose raw contents are never text
const RAW_TEXT: &[(&str, &str)] = &[("<script", "</script"), ("<style", "</style")];

/// Removes tags, comments and script/style bodies, then decodes common entities
///
/// Works on the raw source, so it still produces something when the parsed
/// tree holds no renderable elements.
pub(crate) fn strip_tags(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let len = html.len();
    let mut out = String::with_capacity(len / 2);
    let mut i = 0;

    while i < len {
        let rest = &lower[i..];
        if !rest.starts_with('<') {
            let end = rest.find('<').map(|p| i + p).unwrap_or(len);
            out.push_str(&html[i..end]);
            i = end;
            continue;
        }

        out.push(' ');
        if rest.starts_with("<!--") {
            i = rest.find("-->").map(|p| i + p + 3).unwrap_or(len);
            continue;
        }
        if let Some((_, close)) = RAW_TEXT.iter().find(|(open, _)| rest.starts_with(open)) {
            i = match rest.find(close) {
                Some(p) => {
                    let after = i + p;
                    lower[after..].find('>').map(|q| after + q + 1).unwrap_or(len)
                }
                None => len,
            };
            continue;
        }
        i = rest.find('>').map(|p| i + p + 1).unwrap_or(len);
    }

    collapse_whitespace(&decode_entities(&out))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decodes named entities common in prose plus numeric references
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        let decoded = candidate
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&candidate[1..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &candidate[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
