//! Prompt constants and the user message template.
//!
//! The system prompt and the XML layout of the user turn are the contract
//! between the recognizer output and the model. Keep them in sync.

/// Used when the caller gives no instruction (empty or whitespace-only).
pub const DEFAULT_INSTRUCTION: &str = "Extract and list all text from the image, then describe its layout and formatting and explain the context and meaning of the text.";

/// Suggested instructions shown by the shell.
pub const EXAMPLE_PROMPTS: [&str; 3] = [
    "Extract and list all text from the image",
    "Describe the layout and formatting of text",
    "Analyze the context and meaning of the text",
];

/// Rendered inside `<extracted_text>` when recognition found nothing.
pub const NO_TEXT_MARKER: &str = "(no text detected)";

pub const SYSTEM_PROMPT: &str = r#"You are an OCR analysis assistant. Each request contains text that a CRNN (convolutional recurrent neural network) recognizer extracted from an image the user uploaded, together with an instruction from the user.

<rules>
1. Treat the extracted text as noisy machine output. Characters may be missing, merged or misread, especially when the OCR confidence is below 0.5.
2. If the extracted text is "(no text detected)", say plainly that no text was found in the image. Do not invent text.
3. If the image itself is attached, use it to cross-check the extracted text and the visual layout. Otherwise reason from the text alone and do not claim to see the image.
4. Follow the user's instruction. Instructions may ask for grading or feedback on handwritten or printed student work; be specific and fair.
5. Quote the extracted text exactly when you list it.
6. Respond in plain prose or Markdown. Never wrap the whole answer in a code block.
</rules>"#;

/// Builds the XML-wrapped user message.
pub fn build_user_message(
    text: &str,
    confidence: f32,
    has_table: bool,
    has_code: bool,
    image_attached: bool,
    instruction: &str,
) -> String {
    let text = if text.trim().is_empty() {
        NO_TEXT_MARKER
    } else {
        text
    };
    format!(
        r#"<ocr_context>
  <recognizer>crnn</recognizer>
  <ocr_confidence>{confidence:.2}</ocr_confidence>
  <has_table_structure>{has_table}</has_table_structure>
  <has_code_structure>{has_code}</has_code_structure>
  <image_attached>{image_attached}</image_attached>
</ocr_context>

<extracted_text>
{text}
</extracted_text>

<instruction>
{instruction}
</instruction>"#
    )
}
