use redline_core::segment::segment;

fn document_with_headings(n: usize) -> String {
    let mut doc = String::from("Intro line one.\nIntro line two.\n\n");
    for i in 0..n {
        let heading = format!("Heading number {}", i + 1);
        // Underline width deliberately differs from the heading width.
        let underline = "-".repeat(3 + i);
        doc.push_str(&format!("{}\n{}\nParagraph {} text.\n\n", heading, underline, i + 1));
    }
    doc
}

#[test]
fn test_n_headings_give_n_sections() {
    for n in 0..8 {
        let doc = document_with_headings(n);
        let segs = segment(&doc);
        assert_eq!(segs.sections.len(), n, "document with {} headings", n);
        assert_eq!(segs.intro, "Intro line one.\nIntro line two.\n\n");
    }
}

#[test]
fn test_intro_plus_sections_reassemble_exactly() {
    for n in 0..8 {
        let doc = document_with_headings(n);
        assert_eq!(segment(&doc).reassemble(), doc);
    }
}

#[test]
fn test_sections_are_in_document_order() {
    let doc = document_with_headings(4);
    let segs = segment(&doc);
    for (i, section) in segs.sections.iter().enumerate() {
        assert_eq!(section.heading, format!("Heading number {}", i + 1));
        assert!(section.content().starts_with(&format!("Paragraph {} text.", i + 1)));
    }
}

#[test]
fn test_prompt_text_uses_full_width_underline() {
    let doc = document_with_headings(2);
    let segs = segment(&doc);
    assert_eq!(
        segs.sections[1].prompt_text(),
        format!("Heading number 2\n{}\nParagraph 2 text.", "-".repeat(16))
    );
}

#[test]
fn test_zero_headings_whole_document_is_intro() {
    let doc = "No headings at all.\n- a list item\n- another\n";
    let segs = segment(doc);
    assert_eq!(segs.intro, doc);
    assert!(segs.sections.is_empty());
}
