use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A contiguous, immutable segment of a memory source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub content: String,
    pub line_start: usize,
    pub line_end: usize,
    pub created_at: DateTime<Utc>,
}

/// First 16 hex chars of `sha256(source:lineStart:lineEnd:content)`.
pub fn chunk_id(source: &str, line_start: usize, line_end: usize, content: &str) -> String {
    let input = format!("{source}:{line_start}:{line_end}:{content}");
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

struct Paragraph {
    content: String,
    line_start: usize,
    line_end: usize,
}

fn split_paragraphs(text: &str) -> Vec<Paragraph> {
    let lines: Vec<&str> = text.lines().collect();
    let mut paragraphs = Vec::new();
    let mut cur_lines: Vec<&str> = Vec::new();
    let mut cur_start = 0usize;

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            if !cur_lines.is_empty() {
                paragraphs.push(Paragraph {
                    content: cur_lines.join("\n"),
                    line_start: cur_start,
                    line_end: i - 1,
                });
                cur_lines.clear();
            }
        } else {
            if cur_lines.is_empty() {
                cur_start = i;
            }
            cur_lines.push(line);
        }
    }
    if !cur_lines.is_empty() {
        paragraphs.push(Paragraph {
            content: cur_lines.join("\n"),
            line_start: cur_start,
            line_end: lines.len() - 1,
        });
    }
    paragraphs
}

/// Split on `.`, `!`, `?` followed by a space; each returned piece keeps its
/// trailing terminator and separating space.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut cur = String::new();
    let mut i = 0;
    while i < chars.len() {
        cur.push(chars[i]);
        if matches!(chars[i], '.' | '!' | '?') && chars.get(i + 1) == Some(&' ') {
            cur.push(' ');
            sentences.push(std::mem::take(&mut cur));
            i += 1;
        }
        i += 1;
    }
    if !cur.is_empty() {
        sentences.push(cur);
    }
    sentences
}

/// Last `n` bytes of `s`, walked forward to the nearest char boundary so a
/// multi-byte character is never split.
fn tail_chars(s: &str, n: usize) -> String {
    if s.len() <= n {
        return s.to_string();
    }
    let mut start = s.len() - n;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

struct Buffer {
    content: String,
    line_start: usize,
    line_end: usize,
}

/// Split `text` into overlapping, source-annotated chunks.
///
/// `chunk_size` is a desired character budget per chunk; `overlap` is the
/// number of trailing characters seeded into the next chunk's buffer. If
/// `overlap >= chunk_size` it is clamped to `chunk_size / 5`.
pub fn chunk_text(text: &str, source: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let overlap = if overlap >= chunk_size {
        chunk_size / 5
    } else {
        overlap
    };

    let paragraphs = split_paragraphs(text);
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let now = Utc::now();
    let mut chunks = Vec::new();
    let mut buf: Option<Buffer> = None;

    let emit = |chunks: &mut Vec<Chunk>, buf: &Buffer, source: &str, now: DateTime<Utc>| {
        let id = chunk_id(source, buf.line_start, buf.line_end, &buf.content);
        chunks.push(Chunk {
            id,
            source: source.to_string(),
            content: buf.content.clone(),
            line_start: buf.line_start,
            line_end: buf.line_end,
            created_at: now,
        });
    };

    for para in paragraphs {
        if para.content.chars().count() > chunk_size {
            // Flush whatever is buffered before handling the oversized paragraph.
            if let Some(b) = buf.take() {
                emit(&mut chunks, &b, source, now);
                let seed = tail_chars(&b.content, overlap);
                buf = Some(Buffer {
                    content: seed,
                    line_start: b.line_end,
                    line_end: b.line_end,
                });
            }

            for sentence in split_sentences(&para.content) {
                let exceeds = buf
                    .as_ref()
                    .map(|b| {
                        !b.content.is_empty()
                            && b.content.chars().count() + sentence.chars().count() > chunk_size
                    })
                    .unwrap_or(false);
                if exceeds {
                    let b = buf.take().unwrap();
                    emit(&mut chunks, &b, source, now);
                    let seed = tail_chars(&b.content, overlap);
                    buf = Some(Buffer {
                        content: seed,
                        line_start: para.line_start,
                        line_end: para.line_end,
                    });
                }
                let b = buf.get_or_insert_with(|| Buffer {
                    content: String::new(),
                    line_start: para.line_start,
                    line_end: para.line_end,
                });
                b.content.push_str(&sentence);
                b.line_end = para.line_end;
            }
            continue;
        }

        let would_exceed = buf
            .as_ref()
            .map(|b| {
                !b.content.is_empty()
                    && b.content.chars().count() + para.content.chars().count() > chunk_size
            })
            .unwrap_or(false);

        if would_exceed {
            let b = buf.take().unwrap();
            emit(&mut chunks, &b, source, now);
            let seed = tail_chars(&b.content, overlap);
            buf = Some(Buffer {
                content: seed,
                line_start: b.line_end,
                line_end: b.line_end,
            });
        }

        let b = buf.get_or_insert_with(|| Buffer {
            content: String::new(),
            line_start: para.line_start,
            line_end: para.line_end,
        });
        if !b.content.is_empty() {
            b.content.push_str("\n\n");
        }
        b.content.push_str(&para.content);
        b.line_end = para.line_end;
    }

    if let Some(b) = buf {
        if !b.content.is_empty() {
            emit(&mut chunks, &b, source, now);
        }
    }

    chunks
}
