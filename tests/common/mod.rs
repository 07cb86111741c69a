//! Shared fixtures: an in-process backend and a tiny EPUB builder.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use marginalia::error::{RemoteError, RemoteResult};
use marginalia::remote::{Backend, Completion, GenerationRequest};

/// Chapters whose text contains this word make every text request fail.
pub const POISON: &str = "Catastrophe";

/// Deterministic backend answering each task by its cache-key prefix.
#[derive(Default)]
pub struct FakeBackend {
    pub text_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }
}

impl Backend for FakeBackend {
    fn complete(&self, request: &GenerationRequest) -> RemoteResult<Vec<Completion>> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        if request.prompt.contains(POISON) {
            return Err(RemoteError::Status {
                status: 500,
                body: "upstream exploded".into(),
            });
        }

        let args = |s: &str| Completion::ToolArguments(s.to_string());
        let key = request.key.as_str();
        let completions = if key.starts_with("precis") {
            vec![Completion::Text(
                "\"A morning walk; the letter; doubts at dinner.\"".into(),
            )]
        } else if key.starts_with("commentary") {
            vec![args(
                r#"{"items": [
                    {"speaker": "SassBot", "line": "A letter. How daring."},
                    {"speaker": "SlackerBot"},
                    {"speaker": "PoetBot", "line": "The morning, the morning!"}
                ]}"#,
            )]
        } else if key.starts_with("annotation") {
            // The second entry is cut off mid-object, as truncated output would be.
            vec![args(
                r#"{"items": [{"text": "morning walk.", "annotation": "Constitutionals were fashionable."}, {"text": "dinn"#,
            )]
        } else if key.starts_with("addition") {
            (0..5)
                .map(|i| {
                    if i == 2 {
                        args(r#"{"existing_sentence": "She wrote a letter.", "new_sentence": "It ran to four pages."}"#)
                    } else {
                        args(r#"{"existing_sentence": "Not in the chapter.", "new_sentence": "Never."}"#)
                    }
                })
                .collect()
        } else {
            vec![args(
                r#"{"existing_sentence": "She wrote a letter.", "image_description": "A woman writing at a desk by candlelight."}"#,
            )]
        };
        Ok(completions)
    }

    fn image(&self, _prompt: &str) -> RemoteResult<Vec<u8>> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        let img = image::RgbImage::from_fn(24, 24, |x, y| image::Rgb([(x * 10) as u8, (y * 10) as u8, 128]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png)
            .map_err(|e| RemoteError::Parse {
                message: e.to_string(),
            })?;
        Ok(buf.into_inner())
    }
}

/// A chapter document with a header and the given paragraphs.
pub fn chapter_xhtml(id: &str, paragraphs: &[&str]) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("\n\t\t\t<p>{p}</p>"))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\t<head><title>{id}</title></head>\n\t<body>\n\t\t<section id=\"{id}\" epub:type=\"chapter\">\n\t\t\t<header><h2>{id}</h2></header>{body}\n\t\t</section>\n\t</body>\n</html>\n"
    )
}

pub const STORY: &[&str] = &[
    "Dorothea took her morning walk.",
    "She wrote a letter.",
    "At dinner she had doubts.",
];

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Write an unpacked book with the given `(file stem, document)` chapters.
pub fn write_book(root: &Path, chapters: &[(&str, String)]) {
    write(root, "mimetype", "application/epub+zip");
    write(
        root,
        "META-INF/container.xml",
        r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
	<rootfiles>
		<rootfile full-path="epub/content.opf" media-type="application/oebps-package+xml"/>
	</rootfiles>
</container>
"#,
    );

    let items: String = chapters
        .iter()
        .map(|(stem, _)| {
            format!("\n\t\t<item id=\"{stem}\" href=\"text/{stem}.xhtml\" media-type=\"application/xhtml+xml\"/>")
        })
        .collect();
    let refs: String = chapters
        .iter()
        .map(|(stem, _)| format!("\n\t\t<itemref idref=\"{stem}\"/>"))
        .collect();
    let points: String = chapters
        .iter()
        .enumerate()
        .map(|(i, (stem, _))| {
            format!(
                "<navPoint id=\"np-{stem}\" playOrder=\"{}\"><navLabel><text>{stem}</text></navLabel><content src=\"text/{stem}.xhtml\"/></navPoint>",
                i + 1
            )
        })
        .collect();

    write(
        root,
        "epub/content.opf",
        &format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
	<metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
		<dc:identifier id="uid">urn:uuid:00000000-0000-0000-0000-000000000001</dc:identifier>
		<dc:title id="title">Middlemarch</dc:title>
		<dc:creator id="author">George Eliot</dc:creator>
		<dc:language>en</dc:language>
	</metadata>
	<manifest>
		<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
		<item id="toc" href="toc.xhtml" media-type="application/xhtml+xml" properties="nav"/>
		<item id="css" href="css/local.css" media-type="text/css"/>{items}
	</manifest>
	<spine toc="ncx">{refs}
	</spine>
</package>
"#
        ),
    );
    write(
        root,
        "epub/toc.ncx",
        &format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
	<head><meta name="dtb:uid" content="urn:uuid:00000000-0000-0000-0000-000000000001"/></head>
	<docTitle><text>Middlemarch</text></docTitle>
	<navMap id="navmap">{points}</navMap>
</ncx>
"#
        ),
    );
    write(
        root,
        "epub/toc.xhtml",
        r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
	<body><nav epub:type="toc" id="toc"><ol><li><a href="text/chapter-1.xhtml">I</a></li></ol></nav></body>
</html>
"#,
    );
    write(root, "epub/css/local.css", "body { margin: 0; }\n");

    for (stem, document) in chapters {
        write(root, &format!("epub/text/{stem}.xhtml"), document);
    }
}
