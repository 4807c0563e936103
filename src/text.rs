/// Splits generated text into playable sentences. Newlines and the Japanese
/// full stop both end a sentence; the full stop stays attached to its
/// sentence. Returns the trimmed input as a single sentence when no delimiter
/// is present.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in text.lines() {
        let mut rest = line;
        while let Some(pos) = rest.find('。') {
            let end = pos + '。'.len_utf8();
            let part = rest[..end].trim();
            if !part.is_empty() {
                sentences.push(part.to_string());
            }
            rest = &rest[end..];
        }
        let tail = rest.trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }

    if sentences.is_empty() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_string());
        }
    }
    sentences
}

/// Intro segment of a theme document: everything before the first `---`
/// delimiter, split on line boundaries.
pub fn theme_intro_sentences(theme_content: &str) -> Vec<String> {
    let intro = match theme_content.split_once("---") {
        Some((intro, _)) => intro,
        None => theme_content,
    };
    intro
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
