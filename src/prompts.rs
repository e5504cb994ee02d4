//! Prompt templates sent to the LLM provider.

use crate::models::Article;

/// Article text beyond this many characters is cut before summarizing.
const SUMMARY_CONTENT_CHARS: usize = 6000;

/// Deep reads get more of the article.
const DEEP_READ_CONTENT_CHARS: usize = 12000;

fn clip(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

/// Short digest summary. Answer language follows the article.
pub fn summary_prompt(article: &Article) -> String {
    format!(
        "You write entries for a daily AI news digest. Summarize the article below in at most \
         80 words, in the same language as the article. Output only the summary, with no \
         heading, list or preamble.\n\nTitle: {}\nSource: {}\n\n{}",
        article.title,
        article.source.display_name(),
        clip(&article.content, SUMMARY_CONTENT_CHARS)
    )
}

/// Long-form interpretation for the deep-read command.
pub fn deep_read_prompt(article: &Article) -> String {
    format!(
        "Write an in-depth reading of the article below for a technical audience, in the same \
         language as the article. Cover: the core news in two sentences; the key technical or \
         business points; why it matters; open questions or caveats. Use short paragraphs \
         with plain-text section titles.\n\nTitle: {}\nSource: {}\nURL: {}\n\n{}",
        article.title,
        article.source.display_name(),
        article.url,
        clip(&article.content, DEEP_READ_CONTENT_CHARS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use chrono::Local;

    #[test]
    fn test_clip_counts_chars_not_bytes() {
        assert_eq!(clip("量子位新闻", 2), "量子");
        assert_eq!(clip("short", 100), "short");
    }

    #[test]
    fn test_prompts_end_with_article_content() {
        let article = Article::new(
            Source::Qbitai,
            "标题".to_string(),
            "https://www.qbitai.com/1.html".to_string(),
            "正文内容".to_string(),
            Local::now(),
        );
        assert!(summary_prompt(&article).ends_with("正文内容"));
        let deep = deep_read_prompt(&article);
        assert!(deep.contains("https://www.qbitai.com/1.html"));
        assert!(deep.contains("QbitAI"));
    }
}
