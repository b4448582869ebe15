//! Plain text and Markdown pass-through

use super::{non_whitespace_chars, BlockKind, Extraction, ExtractionQuality, StructureHints, TextBlock};

/// Keeps the text as-is and derives block hints from blank lines, `#`
/// headings, list markers, quotes and fenced code
pub(crate) fn extract(raw: &str) -> Option<Extraction> {
    let normalized = raw.replace("\r\n", "\n");
    let text = normalized.trim_matches('\n').trim_end().to_string();
    if text.trim().is_empty() {
        return None;
    }

    let blocks = scan_blocks(&text);
    let title = blocks.iter().find_map(|block| match block.kind {
        BlockKind::Heading(level) => {
            let line = text[block.start..block.end].trim_start();
            Some(line[level as usize..].trim().to_string())
        }
        _ => None,
    });
    let max_depth = blocks
        .iter()
        .filter_map(|block| match block.kind {
            BlockKind::Heading(level) => Some(level as usize),
            _ => None,
        })
        .max()
        .unwrap_or(0);

    let chars = non_whitespace_chars(&text);
    Some(Extraction {
        text,
        title: title.filter(|t| !t.is_empty()),
        hints: StructureHints { blocks, max_depth },
        quality: ExtractionQuality {
            strategy: None,
            coverage: 1.0,
            visible_chars: chars,
            text_chars: chars,
            degraded: false,
        },
    })
}

fn scan_blocks(text: &str) -> Vec<TextBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, BlockKind)> = None;
    let mut fence_start: Option<usize> = None;
    let mut last_end = 0;
    let mut offset = 0;

    let close = |open: &mut Option<(usize, BlockKind)>, blocks: &mut Vec<TextBlock>, end: usize| {
        if let Some((start, kind)) = open.take() {
            blocks.push(TextBlock { kind, start, end });
        }
    };

    for line in text.split('\n') {
        let start = offset;
        let end = offset + line.len();
        offset = end + 1;
        let trimmed = line.trim_start();

        if let Some(fence) = fence_start {
            if trimmed.starts_with("```") {
                blocks.push(TextBlock {
                    kind: BlockKind::Preformatted,
                    start: fence,
                    end,
                });
                fence_start = None;
            }
            continue;
        }

        if trimmed.starts_with("```") {
            close(&mut open, &mut blocks, last_end);
            fence_start = Some(start);
            continue;
        }

        if trimmed.is_empty() {
            close(&mut open, &mut blocks, last_end);
            continue;
        }

        if let Some(level) = heading_level(trimmed) {
            close(&mut open, &mut blocks, last_end);
            blocks.push(TextBlock {
                kind: BlockKind::Heading(level),
                start,
                end,
            });
            continue;
        }

        if open.is_none() {
            open = Some((start, classify(trimmed)));
        }
        last_end = end;
    }

    if let Some(fence) = fence_start {
        blocks.push(TextBlock {
            kind: BlockKind::Preformatted,
            start: fence,
            end: text.len(),
        });
    }
    close(&mut open, &mut blocks, last_end);

    blocks
}

fn heading_level(line: &str) -> Option<u8> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    match line.as_bytes().get(hashes) {
        None | Some(b' ') | Some(b'\t') => Some(hashes as u8),
        _ => None,
    }
}

fn classify(line: &str) -> BlockKind {
    if line.starts_with('>') {
        return BlockKind::Quote;
    }
    if ["- ", "* ", "+ "].iter().any(|marker| line.starts_with(marker)) {
        return BlockKind::ListItem;
    }
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 && line[digits..].starts_with(". ") {
        return BlockKind::ListItem;
    }
    BlockKind::Paragraph
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<BlockKind> {
        scan_blocks(text).into_iter().map(|b| b.kind).collect()
    }

    #[test]
    fn test_markdown_blocks() {
        let text = "# Title\n\nIntro line one\nline two\n\n- a\n- b\n\n> quoted\n\n```\ncode\n\nmore\n```\n\n## Next";
        assert_eq!(
            kinds(text),
            vec![
                BlockKind::Heading(1),
                BlockKind::Paragraph,
                BlockKind::ListItem,
                BlockKind::Quote,
                BlockKind::Preformatted,
                BlockKind::Heading(2),
            ]
        );
    }

    #[test]
    fn test_block_offsets_cover_lines() {
        let text = "Para one\ncontinues\n\n1. first";
        let blocks = scan_blocks(text);
        assert_eq!(&text[blocks[0].start..blocks[0].end], "Para one\ncontinues");
        assert_eq!(&text[blocks[1].start..blocks[1].end], "1. first");
        assert_eq!(blocks[1].kind, BlockKind::ListItem);
    }

    #[test]
    fn test_hash_without_space_is_not_heading() {
        assert_eq!(kinds("#hashtag text"), vec![BlockKind::Paragraph]);
    }

    #[test]
    fn test_crlf_and_blank_input() {
        let extraction = extract("\r\n# Head\r\n\r\nbody\r\n").unwrap();
        assert_eq!(extraction.text, "# Head\n\nbody");
        assert_eq!(extraction.title.as_deref(), Some("Head"));
        assert_eq!(extraction.hints.max_depth, 1);
        assert!(extract("  \n\n ").is_none());
    }
}
