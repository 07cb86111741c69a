//! The five generation tasks run for every chapter.
//!
//! Each task owns its instructions, output tool, sampling parameters and a key
//! version. The version is part of the cache key: whenever a task's prompt or
//! schema changes meaning, bump it so stale cached output is not served.

use crate::annotate::model::{BookInfo, Chapter};
use crate::remote::{GenerationRequest, SamplingParams, ToolSchema};

/// Task kinds, in the fixed order their results are dispatched and merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Precis,
    Commentary,
    Annotation,
    Addition,
    Illustration,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Precis,
        TaskKind::Commentary,
        TaskKind::Annotation,
        TaskKind::Addition,
        TaskKind::Illustration,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Precis => "precis",
            TaskKind::Commentary => "commentary",
            TaskKind::Annotation => "annotation",
            TaskKind::Addition => "addition",
            TaskKind::Illustration => "illustration",
        }
    }

    /// Cache-key version. Zero means the key carries no version suffix.
    pub fn version(self) -> u32 {
        match self {
            TaskKind::Precis => 0,
            TaskKind::Commentary => 11,
            TaskKind::Annotation => 19,
            TaskKind::Addition => 9,
            TaskKind::Illustration => 5,
        }
    }

    /// Stable cache key for this task on one chapter.
    pub fn cache_key(self, slug: &str) -> String {
        match self.version() {
            0 => format!("{}_{slug}", self.name()),
            v => format!("{}{v}_{slug}", self.name()),
        }
    }

    pub fn sampling(self) -> SamplingParams {
        match self {
            TaskKind::Precis | TaskKind::Illustration => SamplingParams::default(),
            TaskKind::Commentary => SamplingParams {
                temperature: Some(1.1),
                samples: None,
            },
            TaskKind::Annotation => SamplingParams {
                temperature: Some(1.2),
                samples: None,
            },
            TaskKind::Addition => SamplingParams {
                temperature: Some(1.4),
                samples: Some(5),
            },
        }
    }

    pub fn tool(self) -> Option<ToolSchema> {
        match self {
            TaskKind::Precis => None,
            TaskKind::Commentary => Some(ToolSchema::list(
                "dialog",
                "Process a dialog",
                &[
                    ("speaker", "The speaker in the conversation"),
                    ("line", "The line spoken by the speaker"),
                ],
            )),
            TaskKind::Annotation => Some(ToolSchema::list(
                "annotate",
                "Handle list of annotations",
                &[
                    ("text", "Verbatim text snippet to annotate"),
                    ("annotation", "The annotation text to show for that snippet"),
                ],
            )),
            TaskKind::Addition => Some(ToolSchema::object(
                "addition",
                "Handle new sentence",
                &[
                    ("existing_sentence", "Verbatim text of the existing sentence"),
                    ("new_sentence", "New sentence to insert afterward"),
                ],
            )),
            TaskKind::Illustration => Some(ToolSchema::object(
                "illustration",
                "Generate illustration",
                &[
                    ("existing_sentence", "Verbatim text of the existing sentence"),
                    (
                        "image_description",
                        "Description of an illustration for the sentence",
                    ),
                ],
            )),
        }
    }

    pub fn instructions(self) -> &'static str {
        match self {
            TaskKind::Precis => PRECIS,
            TaskKind::Commentary => COMMENTARY,
            TaskKind::Annotation => ANNOTATION,
            TaskKind::Addition => ADDITION,
            TaskKind::Illustration => ILLUSTRATION,
        }
    }

    /// Build the request for this task on `chapter`.
    pub fn request(self, book: &BookInfo, chapter: &Chapter) -> GenerationRequest {
        GenerationRequest {
            key: self.cache_key(&chapter.slug),
            prompt: format!("{}{}", prompt_prefix(book, &chapter.text), self.instructions()),
            tool: self.tool(),
            sampling: self.sampling(),
        }
    }
}

/// All five requests for a chapter, in [`TaskKind::ALL`] order.
pub fn build_requests(book: &BookInfo, chapter: &Chapter) -> Vec<GenerationRequest> {
    TaskKind::ALL
        .iter()
        .map(|task| task.request(book, chapter))
        .collect()
}

fn prompt_prefix(book: &BookInfo, text: &str) -> String {
    format!(
        "The following is a chapter from {} by {}:\n\n{text}\n\nINSTRUCTIONS: ",
        book.title, book.author
    )
}

const PRECIS: &str = "\
Write a very concise precis or argument to stand at the head of the chapter above, in the \
manner of a 19th century novel: one sentence of clauses separated by semicolons, in clipped \
syntax rather than full grammar. Be concrete rather than vague. Name the dynamics between \
characters instead of saying \"relationship dynamics revealed\", and say what is to be \
expected instead of \"setting the stage for future developments\". Leave out no major episode. \
For example: \"Introducing Mr. Smith, a resident of Whitehall; his interest in trains; a \
debate with Mr. Jones regarding train design; ominous signs for their upcoming presentation.\" \
Keep the tone light and teasing, so the reader is tempted onward.";

const COMMENTARY: &str = "\
Roleplay a short scene in which these commentary bots discuss the chapter:

* PoserBot wants its deep insights about the text taken very seriously.
* SlackerBot did not read the chapter and is fishing for a line or two to comment on.
* SocialBot wants everyone excited about the book's twists and turns.
* PoetBot is an amateur poet who remarks on particularly lyrical passages.
* SassBot is a snarky critic with varied and incisive commentary.

Write them wittily and precisely, like characters in prestige television.

Write five or six lines in total, in a mixed order. Keep each line to short, natural \
sentences rather than paragraphs. Not every bot has to speak, and a bot may speak twice.

Use the dialog tool and return each line as {'speaker': 'name', 'line': 'text'}.";

const ANNOTATION: &str = "\
Provide a few officious footnotes, in the style of the original text, as from a Publisher \
who wants to sound knowing, sophisticated, well informed and wry, but who may be blustery \
or unintentionally funny.

Use the annotate tool and return each footnote as \
{'text': 'verbatim text to annotate', 'annotation': 'footnote'}.";

const ADDITION: &str = "\
Propose one additional sentence, in the style of the original, that would improve the text. \
Use the addition tool and return it as {'existing_sentence': 'text', 'new_sentence': 'text'}.";

const ILLUSTRATION: &str = "\
Pick one sentence from the chapter that could be illustrated by an engraving, and describe \
an image illustrating it in the context of the chapter. Describe a realistic scene from the \
chapter, not fantastical imagery.

Use the illustration tool and return the sentence and description as \
{'existing_sentence': 'text', 'image_description': 'text'}.";
