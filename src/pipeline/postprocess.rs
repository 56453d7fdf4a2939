//! Post-processing: deterministic normalisation of the LLM's raw structure.
//!
//! ## Why is post-processing necessary?
//!
//! The model's output is untrusted and frequently malformed in *predictable*
//! ways — a part emitted twice because the paper split across pages, missing
//! fields, en-dashes where ids need hyphens, fabricated question numbers.
//! Each stage here fixes exactly one class of defect, so failures stay
//! isolated and every stage is independently testable. The pipeline degrades
//! to "best effort plus reported errors" rather than hard-failing: a human
//! reviews every extracted test before publishing, so a document with gaps
//! and an error list beats no document at all.
//!
//! ## Stage Order
//!
//! Stages must run in this specific order: duplicate parts are merged before
//! defaults so per-part indices are final; defaults (including type
//! inference) run before image injection so map-labelling questions exist to
//! anchor on; numbering runs second-to-last so nothing shifts questions
//! afterwards; validation observes the finished document.
//!
//! Every stage is a total pure function `ExamDocument -> ExamDocument` —
//! malformed input gets defaults, never a panic — except the final
//! validator, which reports instead of raising.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, warn};

use crate::model::{
    Answer, ExamDocument, InputType, Part, Question, QuestionType, Section, UploadedImage,
    ValidationReport,
};
use crate::storage::ImageStore;

/// Request-scoped defaults the pipeline fills in when the model omitted them.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub section: Section,
    pub test: String,
}

/// Run all eight stages over a freshly parsed document.
///
/// `uploads` are the page images persisted for this request (stage 3 wires
/// the first map-flagged one into the question sequence); `store` persists
/// inline base64 payloads (stage 4). Returns the normalised document and the
/// validation report — validation failure never aborts.
pub async fn normalize_document(
    doc: ExamDocument,
    uploads: &[UploadedImage],
    store: &dyn ImageStore,
    ctx: &PipelineContext,
) -> (ExamDocument, ValidationReport) {
    let doc = merge_duplicate_parts(doc);
    let doc = apply_structural_defaults(doc, ctx);
    let doc = inject_map_images(doc, uploads, ctx);
    let doc = materialize_inline_images(doc, store).await;
    let doc = link_draggable_variants(doc);
    let doc = normalize_id_punctuation(doc);
    let doc = enforce_numbering(doc, ctx);
    let report = validate_structure(&doc);
    (doc, report)
}

// ── Stage 1: Merge duplicate parts ───────────────────────────────────────────
//
// A paper split across pages makes the model emit "Part 2" twice, once per
// page. Question order within each duplicate is correct, so concatenating in
// encounter order reconstructs the full part.

pub fn merge_duplicate_parts(mut doc: ExamDocument) -> ExamDocument {
    let Some(parts) = doc.parts.take() else {
        return doc;
    };

    let mut merged: Vec<Part> = Vec::new();
    let mut index_of: HashMap<u32, usize> = HashMap::new();

    for part in parts {
        match part.part {
            Some(n) => {
                if let Some(&idx) = index_of.get(&n) {
                    debug!("merging duplicate part {n}");
                    let extra = part.questions.unwrap_or_default();
                    merged[idx]
                        .questions
                        .get_or_insert_with(Vec::new)
                        .extend(extra);
                } else {
                    index_of.insert(n, merged.len());
                    merged.push(part);
                }
            }
            None => merged.push(part),
        }
    }

    // Unnumbered parts sort last, in encounter order, and receive a number
    // during defaulting.
    merged.sort_by_key(|p| p.part.unwrap_or(u32::MAX));
    doc.parts = Some(merged);
    doc
}

// ── Stage 2: Structural defaulting ───────────────────────────────────────────

/// Generic instructions used when the model produced none.
const PLACEHOLDER_INSTRUCTIONS: &str = "Answer the questions below.";

pub fn apply_structural_defaults(mut doc: ExamDocument, ctx: &PipelineContext) -> ExamDocument {
    if doc.test.as_deref().map_or(true, str::is_empty) {
        doc.test = Some(ctx.test.clone());
    }
    if doc.section.as_deref().map_or(true, str::is_empty) {
        doc.section = Some(ctx.section.display_name().to_string());
    }
    let test = doc.test.clone().unwrap_or_default();
    let section_slug = ctx.section.slug();

    let parts = doc.parts.take().unwrap_or_default();
    let parts = parts
        .into_iter()
        .enumerate()
        .map(|(i, mut part)| {
            let part_number = *part.part.get_or_insert(i as u32 + 1);
            part.instructions
                .get_or_insert_with(|| PLACEHOLDER_INSTRUCTIONS.to_string());
            part.questions_range.get_or_insert_with(|| {
                format!(
                    "{}-{}",
                    part_number.saturating_sub(1) * 10 + 1,
                    part_number * 10
                )
            });
            let instructions = part.instructions.clone().unwrap_or_default();

            let questions = part.questions.take().unwrap_or_default();
            let questions = questions
                .into_iter()
                .enumerate()
                .map(|(j, q)| default_question(q, &instructions, section_slug, &test, part_number, j))
                .collect();
            part.questions = Some(questions);
            part
        })
        .collect();

    doc.parts = Some(parts);
    doc
}

fn default_question(
    mut q: Question,
    instructions: &str,
    section_slug: &str,
    test: &str,
    part_number: u32,
    index: usize,
) -> Question {
    if q.question_type.is_none() || q.question_type == Some(QuestionType::Unknown) {
        q.question_type = Some(infer_question_type(&q, instructions));
    }
    let qtype = q.question_type.unwrap_or(QuestionType::FormFill);

    q.question_id
        .get_or_insert_with(|| format!("{section_slug}-{test}-{part_number}-{}", index + 1));

    if qtype.is_structural() {
        // Dividers and images carry no number and are not answered.
        q.is_interactive.get_or_insert(false);
    } else {
        q.number
            .get_or_insert(part_number.saturating_sub(1) * 10 + index as u32 + 1);
        if q.input_type.is_none() {
            q.input_type = input_type_for(qtype);
        }
        if q.answer_constraints.is_none() {
            q.answer_constraints = answer_constraints_for(qtype).map(str::to_string);
        }
        q.is_interactive.get_or_insert(true);
        q.answer.get_or_insert_with(Answer::default);
    }
    q
}

/// Fixed type → input widget table.
fn input_type_for(qtype: QuestionType) -> Option<InputType> {
    match qtype {
        QuestionType::FormFill
        | QuestionType::MapLabelling
        | QuestionType::ShortAnswer
        | QuestionType::SentenceCompletion => Some(InputType::Text),
        QuestionType::MultipleChoice => Some(InputType::Radio),
        QuestionType::MultiSelect => Some(InputType::Checkbox),
        QuestionType::Matching => Some(InputType::Drag),
        QuestionType::Divider | QuestionType::Image | QuestionType::Unknown => None,
    }
}

/// Fixed type → answer-instruction table.
fn answer_constraints_for(qtype: QuestionType) -> Option<&'static str> {
    match qtype {
        QuestionType::FormFill => Some("Write NO MORE THAN TWO WORDS AND/OR A NUMBER."),
        QuestionType::MultipleChoice => Some("Choose the correct letter."),
        QuestionType::MultiSelect => Some("Choose TWO letters."),
        QuestionType::Matching => Some("Drag the correct option into the gap."),
        QuestionType::MapLabelling => Some("Write the correct letter next to the question."),
        QuestionType::ShortAnswer => Some("Write NO MORE THAN THREE WORDS."),
        QuestionType::SentenceCompletion => Some("Complete the sentence with ONE WORD ONLY."),
        QuestionType::Divider | QuestionType::Image | QuestionType::Unknown => None,
    }
}

/// Heuristic type inference, applied only when the model omitted `type`.
///
/// The rule table is deliberately one function so a better classifier can
/// replace it without touching pipeline plumbing:
///
/// | Signal | Inferred type |
/// |--------|---------------|
/// | blank marker + map/diagram/label instructions | map-labelling |
/// | blank marker + form/notes/table instructions  | form-fill |
/// | blank marker otherwise                        | sentence-completion |
/// | option list + "choose two/three"              | multi-select |
/// | option list otherwise                         | multiple-choice |
/// | drag variants or "match" instructions         | matching |
/// | "short answer" / "no more than" instructions  | short-answer |
/// | anything else                                 | form-fill |
pub fn infer_question_type(q: &Question, instructions: &str) -> QuestionType {
    let text = format!(
        "{} {}",
        q.question_text.as_deref().unwrap_or(""),
        q.text.as_deref().unwrap_or("")
    );
    let instr = instructions.to_lowercase();

    if text.contains("____") || text.contains("...") {
        if ["map", "diagram", "label"].iter().any(|k| instr.contains(k)) {
            return QuestionType::MapLabelling;
        }
        if ["form", "notes", "table"].iter().any(|k| instr.contains(k)) {
            return QuestionType::FormFill;
        }
        return QuestionType::SentenceCompletion;
    }

    if q.options.as_ref().is_some_and(|o| !o.is_empty()) {
        if instr.contains("choose two") || instr.contains("choose three") {
            return QuestionType::MultiSelect;
        }
        return QuestionType::MultipleChoice;
    }

    if q.draggable_variants.as_ref().is_some_and(|v| !v.is_empty()) || instr.contains("match") {
        return QuestionType::Matching;
    }

    if instr.contains("short answer") || instr.contains("no more than") {
        return QuestionType::ShortAnswer;
    }

    QuestionType::FormFill
}

// ── Stage 3: Image injection ─────────────────────────────────────────────────
//
// A map-labelling block is unanswerable without its map. The renderer shows
// questions in sequence order, so the map image must sit immediately before
// the first map-labelling question of the part.

pub fn inject_map_images(
    mut doc: ExamDocument,
    uploads: &[UploadedImage],
    ctx: &PipelineContext,
) -> ExamDocument {
    let Some(map_image) = uploads.iter().find(|u| u.is_map) else {
        return doc;
    };
    let Some(parts) = doc.parts.as_mut() else {
        return doc;
    };

    for (i, part) in parts.iter_mut().enumerate() {
        let part_number = part.part.unwrap_or(i as u32 + 1);
        let Some(questions) = part.questions.as_mut() else {
            continue;
        };

        let first_map = questions
            .iter()
            .position(|q| q.question_type == Some(QuestionType::MapLabelling));
        let Some(first_map) = first_map else { continue };

        let image_precedes = questions[..first_map]
            .iter()
            .any(|q| q.question_type == Some(QuestionType::Image));
        if image_precedes {
            continue;
        }

        debug!("injecting map image before question {first_map} of part {part_number}");
        questions.insert(
            first_map,
            Question {
                question_id: Some(format!(
                    "{}-{}-{}-map",
                    ctx.section.slug(),
                    ctx.test,
                    part_number
                )),
                question_type: Some(QuestionType::Image),
                url: Some(map_image.url.clone()),
                headline: Some(map_image.filename.clone()),
                is_interactive: Some(false),
                ..Question::default()
            },
        );
    }

    doc
}

// ── Stage 4: Inline image materialisation ────────────────────────────────────
//
// Models occasionally embed whole images as base64 in the structure. Shipping
// megabytes of base64 to every renderer is unacceptable, so payloads are
// persisted once and replaced with a URL. Failure is non-fatal: the payload
// stays in place and the document still renders.

pub async fn materialize_inline_images(
    mut doc: ExamDocument,
    store: &dyn ImageStore,
) -> ExamDocument {
    let Some(parts) = doc.parts.as_mut() else {
        return doc;
    };

    for part in parts.iter_mut() {
        let Some(questions) = part.questions.as_mut() else {
            continue;
        };
        for q in questions.iter_mut() {
            if q.question_type != Some(QuestionType::Image) {
                continue;
            }
            let Some(payload) = q.image_data.clone() else {
                continue;
            };

            // Tolerate a data-URI prefix.
            let encoded = payload
                .split_once("base64,")
                .map(|(_, rest)| rest)
                .unwrap_or(&payload);
            let bytes = match STANDARD.decode(encoded.trim()) {
                Ok(b) => b,
                Err(e) => {
                    warn!("inline image payload is not valid base64, leaving in place: {e}");
                    continue;
                }
            };

            let filename = format!("{}.png", q.question_id.as_deref().unwrap_or("inline-image"));
            match store.store(&bytes, &filename).await {
                Ok(url) => {
                    q.url = Some(url);
                    q.image_data = None;
                }
                Err(e) => {
                    warn!("failed to persist inline image, leaving payload in place: {e}");
                }
            }
        }
    }

    doc
}

// ── Stage 5: Matching/draggable linkage ──────────────────────────────────────
//
// The divider defines a part's drag labels exactly once; every matching
// question in that part offers the same labels.

pub fn link_draggable_variants(mut doc: ExamDocument) -> ExamDocument {
    let Some(parts) = doc.parts.as_mut() else {
        return doc;
    };

    for part in parts.iter_mut() {
        let Some(questions) = part.questions.as_mut() else {
            continue;
        };

        let variants = questions
            .iter()
            .find(|q| q.question_type == Some(QuestionType::Divider))
            .and_then(|q| q.draggable_variants.clone())
            .filter(|v| !v.is_empty());
        let Some(variants) = variants else { continue };

        for q in questions.iter_mut() {
            if q.question_type == Some(QuestionType::Matching) {
                q.draggable_variants = Some(variants.clone());
            }
        }
    }

    doc
}

// ── Stage 6: ID punctuation normalisation ────────────────────────────────────
//
// OCR and LLMs both substitute typographic dashes into ids; downstream
// lookups split on ASCII hyphens.

const DASH_VARIANTS: [char; 5] = ['–', '—', '―', '‒', '−'];

fn hyphenate(s: &str) -> String {
    s.replace(DASH_VARIANTS, "-")
}

pub fn normalize_id_punctuation(mut doc: ExamDocument) -> ExamDocument {
    let Some(parts) = doc.parts.as_mut() else {
        return doc;
    };

    for part in parts.iter_mut() {
        let Some(questions) = part.questions.as_mut() else {
            continue;
        };
        for q in questions.iter_mut() {
            if let Some(id) = q.question_id.take() {
                q.question_id = Some(hyphenate(&id));
            }
            if let Some(range) = q.number_range.take() {
                q.number_range = Some(hyphenate(&range));
            }
        }
    }

    doc
}

// ── Stage 7: Numbering enforcement ───────────────────────────────────────────

/// Recompute every interactive question's number from its position.
///
/// `number = part_index * 10 + interactive_index + 1` (both 0-based, counting
/// only non-divider/non-image questions), and the id's trailing segment is
/// rewritten to match. This deliberately overwrites whatever the model
/// produced — fabricated numbering is common enough that position is the only
/// trustworthy source. A part holding other than ten questions is renumbered
/// by position all the same; that is the accepted trade-off, not a bug.
pub fn enforce_numbering(mut doc: ExamDocument, ctx: &PipelineContext) -> ExamDocument {
    let test = doc.test.clone().unwrap_or_else(|| ctx.test.clone());
    let Some(parts) = doc.parts.as_mut() else {
        return doc;
    };

    for (part_index, part) in parts.iter_mut().enumerate() {
        let part_number = part.part.unwrap_or(part_index as u32 + 1);
        let Some(questions) = part.questions.as_mut() else {
            continue;
        };

        let mut interactive_index = 0u32;
        for q in questions.iter_mut() {
            if !q.is_interactive_kind() {
                continue;
            }
            let number = part_index as u32 * 10 + interactive_index + 1;
            q.number = Some(number);
            q.question_id = Some(
                match q.question_id.as_deref().and_then(|id| id.rsplit_once('-')) {
                    Some((prefix, _)) => format!("{prefix}-{number}"),
                    None => format!("{}-{}-{}-{}", ctx.section.slug(), test, part_number, number),
                },
            );
            interactive_index += 1;
        }
    }

    doc
}

// ── Stage 8: Final validation ────────────────────────────────────────────────

/// Walk the document and report every missing required field.
///
/// Reports, never raises: the caller returns the document alongside the
/// error list so a human editor can repair it.
pub fn validate_structure(doc: &ExamDocument) -> ValidationReport {
    let mut errors = Vec::new();

    if doc.test.as_deref().map_or(true, str::is_empty) {
        errors.push("Document is missing 'test'".to_string());
    }
    if doc.section.as_deref().map_or(true, str::is_empty) {
        errors.push("Document is missing 'section'".to_string());
    }

    match &doc.parts {
        None => errors.push("Document is missing 'parts'".to_string()),
        Some(parts) => {
            for (i, part) in parts.iter().enumerate() {
                let label = match part.part {
                    Some(n) => format!("Part {n}"),
                    None => format!("Part at position {}", i + 1),
                };
                if part.part.is_none() {
                    errors.push(format!("{label} is missing 'part'"));
                }
                if part.instructions.as_deref().map_or(true, str::is_empty) {
                    errors.push(format!("{label} is missing 'instructions'"));
                }
                if part.questions_range.as_deref().map_or(true, str::is_empty) {
                    errors.push(format!("{label} is missing 'questionsRange'"));
                }
                match &part.questions {
                    None => errors.push(format!("{label} is missing 'questions'")),
                    Some(questions) => {
                        for (j, q) in questions.iter().enumerate() {
                            validate_question(q, &label, j, &mut errors);
                        }
                    }
                }
            }
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

fn validate_question(q: &Question, part_label: &str, index: usize, errors: &mut Vec<String>) {
    if !q.is_interactive_kind() {
        return;
    }
    let label = format!("{part_label}, question {}", index + 1);

    if q.question_id.as_deref().map_or(true, str::is_empty) {
        errors.push(format!("{label}: missing 'questionId'"));
    }
    if q.number.is_none() {
        errors.push(format!("{label}: missing 'number'"));
    }
    if q.question_type.is_none() {
        errors.push(format!("{label}: missing 'type'"));
    }
    if q.input_type.is_none() {
        errors.push(format!("{label}: missing 'inputType'"));
    }
    if q.is_interactive.is_none() {
        errors.push(format!("{label}: missing 'isInteractive'"));
    }
    if q.answer.is_none() {
        errors.push(format!("{label}: missing 'answer'"));
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use std::sync::Mutex;

    fn ctx() -> PipelineContext {
        PipelineContext {
            section: Section::Listening,
            test: "1".to_string(),
        }
    }

    fn question(qtype: QuestionType) -> Question {
        Question {
            question_type: Some(qtype),
            ..Question::default()
        }
    }

    fn part(number: u32, questions: Vec<Question>) -> Part {
        Part {
            part: Some(number),
            instructions: Some("Answer the questions.".into()),
            questions_range: Some(format!("{}-{}", (number - 1) * 10 + 1, number * 10)),
            questions: Some(questions),
        }
    }

    struct RecordingStore {
        stored: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingStore {
        fn new(fail: bool) -> Self {
            Self {
                stored: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl ImageStore for RecordingStore {
        async fn store(&self, _bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
            if self.fail {
                return Err(ExtractError::Internal("store down".into()));
            }
            self.stored.lock().unwrap().push(filename.to_string());
            Ok(format!("/files/{filename}"))
        }
    }

    // ── Stage 1 ──────────────────────────────────────────────────────────

    #[test]
    fn duplicate_parts_merge_in_encounter_order() {
        let mut a = question(QuestionType::FormFill);
        a.question_text = Some("A".into());
        let mut b = question(QuestionType::FormFill);
        b.question_text = Some("B".into());
        let mut c = question(QuestionType::FormFill);
        c.question_text = Some("C".into());

        let doc = ExamDocument {
            parts: Some(vec![part(2, vec![a, b]), part(1, vec![]), part(2, vec![c])]),
            ..ExamDocument::default()
        };

        let doc = merge_duplicate_parts(doc);
        let parts = doc.parts.unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part, Some(1));
        assert_eq!(parts[1].part, Some(2));

        let texts: Vec<_> = parts[1]
            .questions
            .as_ref()
            .unwrap()
            .iter()
            .map(|q| q.question_text.clone().unwrap())
            .collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
    }

    #[test]
    fn merge_keeps_first_duplicate_instructions() {
        let mut first = part(3, vec![]);
        first.instructions = Some("first instructions".into());
        let mut second = part(3, vec![question(QuestionType::FormFill)]);
        second.instructions = Some("second instructions".into());

        let doc = merge_duplicate_parts(ExamDocument {
            parts: Some(vec![first, second]),
            ..ExamDocument::default()
        });
        let parts = doc.parts.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].instructions.as_deref(), Some("first instructions"));
        assert_eq!(parts[0].questions.as_ref().unwrap().len(), 1);
    }

    // ── Stage 2 ──────────────────────────────────────────────────────────

    #[test]
    fn empty_document_receives_all_defaults() {
        let doc = apply_structural_defaults(ExamDocument::default(), &ctx());
        assert_eq!(doc.test.as_deref(), Some("1"));
        assert_eq!(doc.section.as_deref(), Some("Listening"));
        assert_eq!(doc.parts.as_ref().unwrap().len(), 0);
    }

    #[test]
    fn part_defaults_derive_from_position() {
        let doc = ExamDocument {
            parts: Some(vec![Part::default(), Part::default()]),
            ..ExamDocument::default()
        };
        let doc = apply_structural_defaults(doc, &ctx());
        let parts = doc.parts.unwrap();
        assert_eq!(parts[0].part, Some(1));
        assert_eq!(parts[0].questions_range.as_deref(), Some("1-10"));
        assert_eq!(parts[1].part, Some(2));
        assert_eq!(parts[1].questions_range.as_deref(), Some("11-20"));
        assert!(parts[0].instructions.is_some());
    }

    #[test]
    fn question_defaults_fill_every_common_field() {
        let doc = ExamDocument {
            parts: Some(vec![Part {
                part: Some(2),
                questions: Some(vec![Question::default()]),
                ..Part::default()
            }]),
            ..ExamDocument::default()
        };
        let doc = apply_structural_defaults(doc, &ctx());
        let parts = doc.parts.unwrap();
        let q = &parts[0].questions.as_ref().unwrap()[0];
        assert_eq!(q.question_id.as_deref(), Some("listening-1-2-1"));
        assert_eq!(q.number, Some(11));
        assert_eq!(q.question_type, Some(QuestionType::FormFill));
        assert_eq!(q.input_type, Some(InputType::Text));
        assert_eq!(q.is_interactive, Some(true));
        assert_eq!(q.answer, Some(Answer::default()));
        assert!(q.answer_constraints.is_some());
    }

    #[test]
    fn input_type_table_is_fixed() {
        assert_eq!(input_type_for(QuestionType::FormFill), Some(InputType::Text));
        assert_eq!(
            input_type_for(QuestionType::MultipleChoice),
            Some(InputType::Radio)
        );
        assert_eq!(
            input_type_for(QuestionType::MultiSelect),
            Some(InputType::Checkbox)
        );
        assert_eq!(input_type_for(QuestionType::Matching), Some(InputType::Drag));
        assert_eq!(
            input_type_for(QuestionType::MapLabelling),
            Some(InputType::Text)
        );
        assert_eq!(input_type_for(QuestionType::Divider), None);
    }

    #[test]
    fn inference_blank_with_map_instructions() {
        let q = Question {
            question_text: Some("The cafe is next to the ____".into()),
            ..Question::default()
        };
        assert_eq!(
            infer_question_type(&q, "Label the map below"),
            QuestionType::MapLabelling
        );
    }

    #[test]
    fn inference_blank_with_form_instructions() {
        let q = Question {
            question_text: Some("Name: ____".into()),
            ..Question::default()
        };
        assert_eq!(
            infer_question_type(&q, "Complete the notes below"),
            QuestionType::FormFill
        );
    }

    #[test]
    fn inference_blank_fallback_is_sentence_completion() {
        let q = Question {
            question_text: Some("The journey takes ... minutes".into()),
            ..Question::default()
        };
        assert_eq!(
            infer_question_type(&q, "Answer the questions"),
            QuestionType::SentenceCompletion
        );
    }

    #[test]
    fn inference_options_split_on_choose_two() {
        let q = Question {
            options: Some(vec!["A".into(), "B".into(), "C".into()]),
            ..Question::default()
        };
        assert_eq!(
            infer_question_type(&q, "Choose TWO letters from A-E"),
            QuestionType::MultiSelect
        );
        assert_eq!(
            infer_question_type(&q, "Choose the correct letter"),
            QuestionType::MultipleChoice
        );
    }

    #[test]
    fn inference_match_and_short_answer_and_fallback() {
        let q = Question::default();
        assert_eq!(
            infer_question_type(&q, "Match each speaker to an opinion"),
            QuestionType::Matching
        );
        assert_eq!(
            infer_question_type(&q, "Write no more than three words"),
            QuestionType::ShortAnswer
        );
        assert_eq!(
            infer_question_type(&q, "Answer the questions"),
            QuestionType::FormFill
        );
    }

    // ── Stage 3 ──────────────────────────────────────────────────────────

    fn map_upload() -> UploadedImage {
        UploadedImage {
            url: "/files/page-2.png".into(),
            filename: "page-2.png".into(),
            is_map: true,
        }
    }

    #[test]
    fn map_image_injected_before_first_map_question() {
        let doc = ExamDocument {
            parts: Some(vec![part(
                2,
                vec![
                    question(QuestionType::FormFill),
                    question(QuestionType::MapLabelling),
                    question(QuestionType::MapLabelling),
                ],
            )]),
            ..ExamDocument::default()
        };
        let doc = inject_map_images(doc, &[map_upload()], &ctx());
        let parts = doc.parts.unwrap();
        let questions = parts[0].questions.as_ref().unwrap();
        assert_eq!(questions.len(), 4);
        assert_eq!(questions[1].question_type, Some(QuestionType::Image));
        assert_eq!(questions[1].question_id.as_deref(), Some("listening-1-2-map"));
        assert_eq!(questions[1].url.as_deref(), Some("/files/page-2.png"));
        assert_eq!(questions[2].question_type, Some(QuestionType::MapLabelling));
    }

    #[test]
    fn no_injection_when_image_already_precedes() {
        let doc = ExamDocument {
            parts: Some(vec![part(
                1,
                vec![
                    question(QuestionType::Image),
                    question(QuestionType::MapLabelling),
                ],
            )]),
            ..ExamDocument::default()
        };
        let doc = inject_map_images(doc, &[map_upload()], &ctx());
        let parts = doc.parts.unwrap();
        assert_eq!(parts[0].questions.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn no_injection_without_map_flagged_upload() {
        let uploads = vec![UploadedImage {
            url: "/files/page-1.png".into(),
            filename: "page-1.png".into(),
            is_map: false,
        }];
        let doc = ExamDocument {
            parts: Some(vec![part(1, vec![question(QuestionType::MapLabelling)])]),
            ..ExamDocument::default()
        };
        let doc = inject_map_images(doc, &uploads, &ctx());
        let parts = doc.parts.unwrap();
        assert_eq!(parts[0].questions.as_ref().unwrap().len(), 1);
    }

    // ── Stage 4 ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn inline_base64_persisted_and_replaced() {
        let mut img = question(QuestionType::Image);
        img.question_id = Some("listening-1-1-map".into());
        img.image_data = Some(format!("data:image/png;base64,{}", STANDARD.encode(b"png")));

        let doc = ExamDocument {
            parts: Some(vec![part(1, vec![img])]),
            ..ExamDocument::default()
        };
        let store = RecordingStore::new(false);
        let doc = materialize_inline_images(doc, &store).await;

        let parts = doc.parts.unwrap();
        let q = &parts[0].questions.as_ref().unwrap()[0];
        assert_eq!(q.url.as_deref(), Some("/files/listening-1-1-map.png"));
        assert!(q.image_data.is_none());
        assert_eq!(*store.stored.lock().unwrap(), vec!["listening-1-1-map.png"]);
    }

    #[tokio::test]
    async fn store_failure_leaves_payload_in_place() {
        let mut img = question(QuestionType::Image);
        img.image_data = Some(STANDARD.encode(b"png"));

        let doc = ExamDocument {
            parts: Some(vec![part(1, vec![img])]),
            ..ExamDocument::default()
        };
        let doc = materialize_inline_images(doc, &RecordingStore::new(true)).await;

        let parts = doc.parts.unwrap();
        let q = &parts[0].questions.as_ref().unwrap()[0];
        assert!(q.image_data.is_some());
        assert!(q.url.is_none());
    }

    // ── Stage 5 ──────────────────────────────────────────────────────────

    #[test]
    fn divider_variants_copied_to_matching_questions() {
        let mut divider = question(QuestionType::Divider);
        divider.draggable_variants = Some(vec!["X".into(), "Y".into()]);

        let doc = ExamDocument {
            parts: Some(vec![part(
                1,
                vec![
                    divider,
                    question(QuestionType::Matching),
                    question(QuestionType::FormFill),
                    question(QuestionType::Matching),
                ],
            )]),
            ..ExamDocument::default()
        };
        let doc = link_draggable_variants(doc);
        let parts = doc.parts.unwrap();
        let questions = parts[0].questions.as_ref().unwrap();
        let expected = Some(vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(questions[1].draggable_variants, expected);
        assert_eq!(questions[3].draggable_variants, expected);
        assert_eq!(questions[2].draggable_variants, None);
    }

    #[test]
    fn matching_untouched_without_divider() {
        let doc = ExamDocument {
            parts: Some(vec![part(1, vec![question(QuestionType::Matching)])]),
            ..ExamDocument::default()
        };
        let doc = link_draggable_variants(doc);
        let parts = doc.parts.unwrap();
        assert!(parts[0].questions.as_ref().unwrap()[0]
            .draggable_variants
            .is_none());
    }

    // ── Stage 6 ──────────────────────────────────────────────────────────

    #[test]
    fn dash_variants_become_hyphens() {
        for dash in ['–', '—'] {
            let mut q = question(QuestionType::FormFill);
            q.question_id = Some(format!("listening{dash}1{dash}2{dash}3"));
            q.number_range = Some(format!("15{dash}16"));

            let doc = ExamDocument {
                parts: Some(vec![part(1, vec![q])]),
                ..ExamDocument::default()
            };
            let doc = normalize_id_punctuation(doc);
            let parts = doc.parts.unwrap();
            let q = &parts[0].questions.as_ref().unwrap()[0];
            assert_eq!(q.question_id.as_deref(), Some("listening-1-2-3"));
            assert_eq!(q.number_range.as_deref(), Some("15-16"));
        }
    }

    // ── Stage 7 ──────────────────────────────────────────────────────────

    #[test]
    fn numbering_recomputed_from_position() {
        let mut fabricated = question(QuestionType::FormFill);
        fabricated.number = Some(99);
        fabricated.question_id = Some("listening-1-2-99".into());

        let doc = ExamDocument {
            test: Some("1".into()),
            parts: Some(vec![
                part(1, vec![question(QuestionType::FormFill)]),
                part(
                    2,
                    vec![
                        question(QuestionType::Divider),
                        fabricated,
                        question(QuestionType::FormFill),
                    ],
                ),
            ]),
            ..ExamDocument::default()
        };
        let doc = enforce_numbering(doc, &ctx());
        let parts = doc.parts.unwrap();

        let p0 = parts[0].questions.as_ref().unwrap();
        assert_eq!(p0[0].number, Some(1));

        let p1 = parts[1].questions.as_ref().unwrap();
        assert_eq!(p1[0].number, None); // divider untouched
        assert_eq!(p1[1].number, Some(11));
        assert_eq!(p1[1].question_id.as_deref(), Some("listening-1-2-11"));
        assert_eq!(p1[2].number, Some(12));
    }

    #[test]
    fn injected_image_does_not_shift_numbering() {
        let doc = ExamDocument {
            test: Some("1".into()),
            parts: Some(vec![part(
                1,
                vec![
                    question(QuestionType::FormFill),
                    question(QuestionType::Image),
                    question(QuestionType::MapLabelling),
                ],
            )]),
            ..ExamDocument::default()
        };
        let doc = enforce_numbering(doc, &ctx());
        let parts = doc.parts.unwrap();
        let questions = parts[0].questions.as_ref().unwrap();
        assert_eq!(questions[0].number, Some(1));
        assert_eq!(questions[1].number, None);
        assert_eq!(questions[2].number, Some(2));
    }

    // ── Stage 8 ──────────────────────────────────────────────────────────

    #[test]
    fn validation_reports_missing_fields_without_raising() {
        let doc = ExamDocument {
            parts: Some(vec![Part {
                part: Some(1),
                questions: Some(vec![Question::default()]),
                ..Part::default()
            }]),
            ..ExamDocument::default()
        };
        let report = validate_structure(&doc);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("'test'")));
        assert!(report.errors.iter().any(|e| e.contains("'instructions'")));
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("question 1") && e.contains("'questionId'")));
    }

    #[test]
    fn validation_skips_structural_questions() {
        let doc = ExamDocument {
            test: Some("1".into()),
            section: Some("Listening".into()),
            parts: Some(vec![part(
                1,
                vec![question(QuestionType::Divider), question(QuestionType::Image)],
            )]),
            ..ExamDocument::default()
        };
        let report = validate_structure(&doc);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    // ── Full pipeline ────────────────────────────────────────────────────

    #[tokio::test]
    async fn defaulted_document_passes_validation() {
        let raw: ExamDocument = serde_json::from_str(
            r#"{"parts": [
                {"part": 1, "questions": [
                    {"questionText": "Name: ____"},
                    {"questionText": "Phone: ____"}
                ]},
                {"part": 1, "questions": [
                    {"questionText": "Address: ____"}
                ]}
            ]}"#,
        )
        .unwrap();

        let store = RecordingStore::new(false);
        let (doc, report) = normalize_document(raw, &[], &store, &ctx()).await;

        assert!(report.valid, "errors: {:?}", report.errors);
        let parts = doc.parts.unwrap();
        assert_eq!(parts.len(), 1, "duplicate part 1 merged");
        let questions = parts[0].questions.as_ref().unwrap();
        assert_eq!(questions.len(), 3);
        assert_eq!(questions[2].number, Some(3));
        assert_eq!(questions[2].question_id.as_deref(), Some("listening-1-1-3"));
    }
}
