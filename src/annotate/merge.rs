//! Text-anchored merge of generated content into a chapter's section.
//!
//! Steps run in a fixed order over one markup string:
//!
//! 1. footnotes: marker after the first text occurrence of each anchor
//! 2. sentence addition: first candidate whose anchor is found, then stop
//! 3. commit: pending footnote/addition blocks appended to the section
//! 4. illustration: image block after the middle paragraph (positional)
//! 5. precis: summary block after the header
//! 6. commentary: dialogue block appended at the end
//!
//! Steps 1 and 2 search the already-mutated markup. An anchor that does not
//! occur verbatim is skipped without error; generated text is never trusted to
//! reproduce the source exactly.

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::annotate::error::AnnotateResult;
use crate::annotate::illustration;
use crate::annotate::markup;
use crate::annotate::model::{
    Addition, Chapter, DialogueLine, Footnote, GenerationResults, Illustration, MergeArtifact,
    MergeStats, SideFile,
};
use crate::container::ManifestItem;

/// Who signs footnotes and additions.
const READER: &str = "Publisher";

/// Produces processed illustration bytes for a description.
pub trait Illustrator {
    fn render(&self, description: &str) -> AnnotateResult<Vec<u8>>;
}

/// Splices generated content into chapter markup.
pub struct MergeEngine<'a> {
    illustrator: &'a dyn Illustrator,
    /// Images directory as referenced from the package document (`images`).
    images_href: String,
}

impl<'a> MergeEngine<'a> {
    pub fn new(illustrator: &'a dyn Illustrator, images_href: impl Into<String>) -> Self {
        Self {
            illustrator,
            images_href: images_href.into(),
        }
    }

    /// Merge `results` into `chapter`'s section markup.
    ///
    /// Only the illustrator can fail; every anchoring problem is a skip.
    pub fn merge(&self, chapter: &Chapter, results: &GenerationResults) -> AnnotateResult<MergeArtifact> {
        let ws = chapter.whitespace.as_str();
        let mut stats = MergeStats::default();
        let mut markup = chapter.inner_markup().to_string();
        let mut pending = Vec::new();

        let (placed, skipped) =
            apply_footnotes(&mut markup, &mut pending, &chapter.slug, ws, &results.footnotes);
        stats.footnotes_placed = placed;
        stats.footnotes_skipped = skipped;

        stats.addition_placed = apply_addition(&mut markup, &mut pending, ws, &results.additions);

        for block in &pending {
            markup.push_str(block);
        }

        let mut artifact = MergeArtifact::default();
        if let Some(illustration) = &results.illustration {
            if let Some((file, item)) =
                self.insert_illustration(&mut markup, &chapter.slug, ws, illustration)?
            {
                stats.illustrated = true;
                artifact.side_files.push(file);
                artifact.manifest.push(item);
            }
        }

        stats.precis_placed = insert_precis(&mut markup, ws, &results.precis);
        stats.commentary_lines = append_commentary(&mut markup, ws, &results.commentary);

        tracing::debug!(
            chapter = %chapter.slug,
            footnotes = stats.footnotes_placed,
            skipped = stats.footnotes_skipped,
            addition = stats.addition_placed,
            illustrated = stats.illustrated,
            commentary = stats.commentary_lines,
            "merged chapter"
        );

        artifact.markup = markup;
        artifact.stats = stats;
        Ok(artifact)
    }

    fn insert_illustration(
        &self,
        markup: &mut String,
        slug: &str,
        ws: &str,
        illustration: &Illustration,
    ) -> AnnotateResult<Option<(SideFile, ManifestItem)>> {
        let (Some(sentence), Some(description)) = (
            non_blank(&illustration.existing_sentence),
            non_blank(&illustration.image_description),
        ) else {
            tracing::debug!(chapter = slug, "illustration result incomplete; skipping");
            return Ok(None);
        };

        let paragraphs = markup::element_spans(markup, "p");
        if paragraphs.is_empty() {
            tracing::debug!(chapter = slug, "no paragraphs to illustrate; skipping");
            return Ok(None);
        }
        let middle = paragraphs[paragraphs.len() / 2].end;

        let bytes = self.illustrator.render(description)?;
        let name = illustration::file_name(slug);
        let block = format!(
            "{ws}<div class=\"ai-illustration annotation-box\">{ws}<img src=\"../{href}/{name}\"/>{ws}<p><em>{caption}</em></p>{ws}</div>",
            href = self.images_href,
            caption = encode_text(sentence),
        );
        markup::insert_at(markup, middle, &block);

        let item = ManifestItem {
            id: name.clone(),
            href: format!("{}/{name}", self.images_href),
            media_type: "image/png".into(),
        };
        Ok(Some((
            SideFile {
                file_name: name,
                bytes,
            },
            item,
        )))
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

/// Step 1. Returns (placed, skipped).
///
/// Reference numbers count found anchors only; ids use the annotation's
/// position in the generated list.
fn apply_footnotes(
    markup: &mut String,
    pending: &mut Vec<String>,
    slug: &str,
    ws: &str,
    footnotes: &[Footnote],
) -> (usize, usize) {
    let mut number = 1;
    let mut skipped = 0;
    for (i, footnote) in footnotes.iter().enumerate() {
        let (Some(text), Some(note)) = (non_blank(&footnote.text), non_blank(&footnote.annotation))
        else {
            skipped += 1;
            continue;
        };
        let anchor = text.trim_end_matches(['.', '…']);
        if anchor.trim().is_empty() {
            skipped += 1;
            continue;
        }
        let Some(pos) = markup::find_in_text(markup, anchor) else {
            tracing::debug!(chapter = slug, anchor, "footnote anchor not found");
            skipped += 1;
            continue;
        };

        let id = format!("{slug}-note{i}");
        let marker = format!(
            "<a class=\"noteref {READER}\" epub:type=\"noteref\" href=\"#{id}\"><sup>{number}</sup></a>"
        );
        markup::insert_at(markup, pos + anchor.len(), &marker);
        pending.push(format!(
            "{ws}<aside class=\"footnote\" epub:type=\"footnote\" id=\"{id}\"><strong>{READER}:</strong> {}</aside>",
            encode_text(note)
        ));
        number += 1;
    }
    (number - 1, skipped)
}

/// Step 2. At most one addition per chapter.
fn apply_addition(
    markup: &mut String,
    pending: &mut Vec<String>,
    ws: &str,
    candidates: &[Addition],
) -> bool {
    for candidate in candidates {
        let (Some(existing), Some(new)) = (
            non_blank(&candidate.existing_sentence),
            non_blank(&candidate.new_sentence),
        ) else {
            continue;
        };
        let Some(pos) = markup::find_in_text(markup, existing) else {
            tracing::debug!(anchor = existing, "addition anchor not found");
            continue;
        };

        let new = encode_text(new);
        markup::insert_at(markup, pos + existing.len(), &format!(" {new}"));
        pending.push(format!(
            "{ws}<div class=\"ai-addition annotation-box\">The {READER} regretted the necessity to add: {new}</div>"
        ));
        return true;
    }
    false
}

/// Step 5. After the first `<header>`, or at the start of the section when
/// there is none.
fn insert_precis(markup: &mut String, ws: &str, precis: &str) -> bool {
    let precis = precis.trim().trim_matches('"').trim();
    if precis.is_empty() {
        return false;
    }
    let at = markup::element_spans(markup, "header")
        .first()
        .map_or(0, |span| span.end);
    let block = format!(
        "{ws}<div class=\"ai-summary annotation-box\">{}</div>",
        encode_text(precis)
    );
    markup::insert_at(markup, at, &block);
    true
}

/// Step 6. Well-formed lines only, in their generated order. Returns the
/// number of lines rendered.
fn append_commentary(markup: &mut String, ws: &str, commentary: &[DialogueLine]) -> usize {
    let lines: Vec<String> = commentary
        .iter()
        .filter_map(|entry| Some((non_blank(&entry.speaker)?, non_blank(&entry.line)?)))
        .map(|(speaker, line)| {
            format!(
                "<p><strong class=\"{}\">{}:</strong> {}</p>",
                encode_double_quoted_attribute(speaker),
                encode_text(speaker),
                encode_text(line)
            )
        })
        .collect();
    if lines.is_empty() {
        return 0;
    }

    let separator = format!("{ws}\t");
    markup.push_str(&format!(
        "{ws}<div class=\"ai-commentary annotation-box\">{ws}\t{}{ws}</div>",
        lines.join(&separator)
    ));
    lines.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::path::Path;

    struct FixedImage {
        calls: Cell<usize>,
    }

    impl FixedImage {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }
    }

    impl Illustrator for FixedImage {
        fn render(&self, _description: &str) -> AnnotateResult<Vec<u8>> {
            self.calls.set(self.calls.get() + 1);
            Ok(b"PNG".to_vec())
        }
    }

    fn chapter(inner: &str) -> Chapter {
        Chapter::parse(
            "chapter-1",
            Path::new("chapter-1.xhtml"),
            format!("<html><body><section id=\"chapter-1\">{inner}</section></body></html>"),
        )
        .unwrap()
    }

    fn footnote(text: &str, note: &str) -> Footnote {
        Footnote {
            text: Some(text.into()),
            annotation: Some(note.into()),
        }
    }

    fn addition(existing: &str, new: &str) -> Addition {
        Addition {
            existing_sentence: Some(existing.into()),
            new_sentence: Some(new.into()),
        }
    }

    fn line(speaker: Option<&str>, text: Option<&str>) -> DialogueLine {
        DialogueLine {
            speaker: speaker.map(Into::into),
            line: text.map(Into::into),
        }
    }

    const BODY: &str = "\n\t\t\t<header><h2>Chapter I</h2></header>\n\t\t\t<p>Miss Brooke had that kind of beauty which seems to be thrown into relief by poor dress.</p>\n\t\t\t<p>Her hand and wrist were so finely formed.</p>\n\t\t";

    #[test]
    fn footnote_numbers_count_found_anchors_only() {
        let mut markup = BODY.to_string();
        let mut pending = Vec::new();
        let notes = vec![
            footnote("thrown into relief", "A phrase of the age."),
            footnote("not in this chapter", "Lost."),
            footnote("finely formed.", "Naturally."),
        ];
        let (placed, skipped) = apply_footnotes(&mut markup, &mut pending, "chapter-1", "\n", &notes);

        assert_eq!((placed, skipped), (2, 1));
        assert!(markup.contains(
            "thrown into relief<a class=\"noteref Publisher\" epub:type=\"noteref\" href=\"#chapter-1-note0\"><sup>1</sup></a>"
        ));
        assert!(markup.contains(
            "finely formed<a class=\"noteref Publisher\" epub:type=\"noteref\" href=\"#chapter-1-note2\"><sup>2</sup></a>."
        ));
        assert!(!markup.contains("<sup>3</sup>"));
        assert_eq!(
            pending,
            vec![
                "\n<aside class=\"footnote\" epub:type=\"footnote\" id=\"chapter-1-note0\"><strong>Publisher:</strong> A phrase of the age.</aside>",
                "\n<aside class=\"footnote\" epub:type=\"footnote\" id=\"chapter-1-note2\"><strong>Publisher:</strong> Naturally.</aside>",
            ]
        );
    }

    #[test]
    fn missing_anchors_leave_markup_unchanged() {
        let mut markup = BODY.to_string();
        let mut pending = Vec::new();
        let notes = vec![
            footnote("Miss Brooke had that kind of beauty, which", "Comma."),
            Footnote {
                text: Some("Her hand".into()),
                annotation: None,
            },
            footnote("...", "Only dots."),
        ];
        let (placed, skipped) = apply_footnotes(&mut markup, &mut pending, "chapter-1", "", &notes);
        assert_eq!((placed, skipped), (0, 3));
        assert_eq!(markup, BODY);
        assert!(pending.is_empty());

        assert!(!apply_addition(
            &mut markup,
            &mut pending,
            "",
            &[addition("She was not in the text.", "Nor this.")]
        ));
        assert_eq!(markup, BODY);
        assert!(pending.is_empty());
    }

    #[test]
    fn blank_anchor_after_stripping_is_skipped() {
        let mut markup = BODY.to_string();
        let mut pending = Vec::new();
        let notes = vec![footnote(" .", "Whitespace only."), footnote(" …", "Also blank.")];
        let (placed, skipped) = apply_footnotes(&mut markup, &mut pending, "chapter-1", "", &notes);
        assert_eq!((placed, skipped), (0, 2));
        assert_eq!(markup, BODY);
        assert!(pending.is_empty());
    }

    #[test]
    fn only_first_occurrence_is_annotated() {
        let mut markup = "<p>Yes. Yes.</p>".to_string();
        let mut pending = Vec::new();
        apply_footnotes(&mut markup, &mut pending, "c", "", &[footnote("Yes", "Twice.")]);
        assert_eq!(
            markup,
            "<p>Yes<a class=\"noteref Publisher\" epub:type=\"noteref\" href=\"#c-note0\"><sup>1</sup></a>. Yes.</p>"
        );
    }

    #[test]
    fn later_steps_see_earlier_mutations() {
        // The second footnote anchors on text that only the first footnote's id contains
        // in an attribute; it must not match there.
        let mut markup = "<p>chapter-1 begins</p>".to_string();
        let mut pending = Vec::new();
        let notes = vec![footnote("begins", "One."), footnote("note0", "Should not land.")];
        let (placed, _) = apply_footnotes(&mut markup, &mut pending, "chapter-1", "", &notes);
        assert_eq!(placed, 1);
        assert_eq!(markup.matches("<sup>").count(), 1);
    }

    #[test]
    fn single_addition_stops_at_first_match() {
        let mut markup = BODY.to_string();
        let mut pending = Vec::new();
        let candidates = vec![
            addition("Absent one.", "A."),
            addition("Absent two.", "B."),
            addition("Her hand and wrist were so finely formed.", "She knew it."),
            Addition::default(),
            addition("Miss Brooke had that kind of beauty", "Never applied."),
        ];
        assert!(apply_addition(&mut markup, &mut pending, "\n", &candidates));
        assert!(markup.contains("Her hand and wrist were so finely formed. She knew it.</p>"));
        assert!(!markup.contains("Never applied."));
        assert_eq!(
            pending,
            vec!["\n<div class=\"ai-addition annotation-box\">The Publisher regretted the necessity to add: She knew it.</div>"]
        );
    }

    #[test]
    fn illustration_goes_after_middle_paragraph() {
        let paragraphs: String = (0..7).map(|i| format!("\n<p>Paragraph {i}.</p>")).collect();
        let ch = chapter(&format!("\n<header><h2>II</h2></header>{paragraphs}\n"));
        let results = GenerationResults {
            illustration: Some(Illustration {
                existing_sentence: Some("Paragraph 5.".into()),
                image_description: Some("A quiet study".into()),
            }),
            ..Default::default()
        };
        let images = FixedImage::new();
        let artifact = MergeEngine::new(&images, "images").merge(&ch, &results).unwrap();

        assert_eq!(images.calls.get(), 1);
        let block_at = artifact.markup.find("<div class=\"ai-illustration").unwrap();
        let third = artifact.markup.find("<p>Paragraph 3.</p>").unwrap();
        let fourth = artifact.markup.find("<p>Paragraph 4.</p>").unwrap();
        assert!(third < block_at && block_at < fourth);
        assert!(artifact.markup.contains(
            "<div class=\"ai-illustration annotation-box\">\n<img src=\"../images/illustration_chapter-1.png\"/>\n<p><em>Paragraph 5.</em></p>\n</div>"
        ));
        assert_eq!(
            artifact.manifest,
            vec![ManifestItem {
                id: "illustration_chapter-1.png".into(),
                href: "images/illustration_chapter-1.png".into(),
                media_type: "image/png".into(),
            }]
        );
        assert_eq!(artifact.side_files[0].bytes, b"PNG");
        assert!(artifact.stats.illustrated);
    }

    #[test]
    fn no_paragraphs_means_no_illustration() {
        let ch = chapter("\n<header><h2>III</h2></header>\n");
        let results = GenerationResults {
            illustration: Some(Illustration {
                existing_sentence: Some("x".into()),
                image_description: Some("y".into()),
            }),
            ..Default::default()
        };
        let images = FixedImage::new();
        let artifact = MergeEngine::new(&images, "images").merge(&ch, &results).unwrap();
        assert_eq!(images.calls.get(), 0);
        assert!(artifact.side_files.is_empty());
        assert!(artifact.manifest.is_empty());
    }

    #[test]
    fn precis_after_header_without_quotes() {
        let mut markup = BODY.to_string();
        assert!(insert_precis(&mut markup, "\n\t\t\t", "\"Introducing Miss Brooke; her sister Celia.\""));
        assert!(markup.contains(
            "</header>\n\t\t\t<div class=\"ai-summary annotation-box\">Introducing Miss Brooke; her sister Celia.</div>\n\t\t\t<p>Miss Brooke"
        ));
    }

    #[test]
    fn precis_without_header_goes_first() {
        let mut markup = "<p>x</p>".to_string();
        assert!(insert_precis(&mut markup, "", "Summary"));
        assert!(markup.starts_with("<div class=\"ai-summary annotation-box\">Summary</div><p>x</p>"));
        assert!(!insert_precis(&mut markup, "", "  \"\"  "));
    }

    #[test]
    fn commentary_drops_malformed_lines() {
        let mut markup = String::new();
        let commentary = vec![
            line(Some("SassBot"), Some("Riveting.")),
            line(Some("SlackerBot"), None),
            line(Some("PoetBot"), Some("Hark, a wrist!")),
        ];
        assert_eq!(append_commentary(&mut markup, "\n", &commentary), 2);
        assert_eq!(
            markup,
            "\n<div class=\"ai-commentary annotation-box\">\n\t<p><strong class=\"SassBot\">SassBot:</strong> Riveting.</p>\n\t<p><strong class=\"PoetBot\">PoetBot:</strong> Hark, a wrist!</p>\n</div>"
        );
    }

    #[test]
    fn empty_commentary_appends_nothing() {
        let mut markup = "<p>x</p>".to_string();
        assert_eq!(append_commentary(&mut markup, "", &[line(None, Some("orphan"))]), 0);
        assert_eq!(markup, "<p>x</p>");
    }

    #[test]
    fn generated_text_is_escaped() {
        let mut markup = "<p>Tea</p>".to_string();
        let mut pending = Vec::new();
        apply_footnotes(&mut markup, &mut pending, "c", "", &[footnote("Tea", "Cakes & <ale>")]);
        assert!(pending[0].contains("Cakes &amp; &lt;ale&gt;"));
    }

    #[test]
    fn full_merge_order() {
        let ch = chapter(BODY);
        let results = GenerationResults {
            precis: "\"Miss Brooke's beauty; her hands.\"".into(),
            commentary: vec![line(Some("SocialBot"), Some("Twists ahead!"))],
            footnotes: vec![footnote("poor dress", "Muslin, presumably.")],
            additions: vec![addition("Her hand and wrist were so finely formed.", "Celia envied them.")],
            illustration: Some(Illustration {
                existing_sentence: Some("Her hand and wrist were so finely formed.".into()),
                image_description: Some("A young woman's hands on a prayer book".into()),
            }),
        };
        let images = FixedImage::new();
        let artifact = MergeEngine::new(&images, "images").merge(&ch, &results).unwrap();
        let m = &artifact.markup;

        let header = m.find("</header>").unwrap();
        let summary = m.find("ai-summary").unwrap();
        let note_ref = m.find("<sup>1</sup>").unwrap();
        let aside = m.find("<aside").unwrap();
        let added = m.find("ai-addition").unwrap();
        let commentary = m.find("ai-commentary").unwrap();
        assert!(header < summary && summary < note_ref);
        assert!(note_ref < aside && aside < added && added < commentary);
        assert!(m.ends_with("</div>"));

        // Two source paragraphs: the illustration follows the second (index 1).
        let second_p_end = m.find("Celia envied them.</p>").unwrap();
        let illus = m.find("ai-illustration").unwrap();
        assert!(second_p_end < illus && illus < aside);

        assert_eq!(
            artifact.stats,
            MergeStats {
                footnotes_placed: 1,
                footnotes_skipped: 0,
                addition_placed: true,
                illustrated: true,
                precis_placed: true,
                commentary_lines: 1,
            }
        );
    }
}
