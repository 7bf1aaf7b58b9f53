// file: src/processors/prompts.rs
// description: prompt builders for the summarize, refine, phrase and background stages
// reference: Internal prompt standards

use crate::config::PromptStyle;
use crate::llm::ToolSpec;
use crate::models::{ProductInput, SceneItem};
use serde_json::json;

pub const JSON_ONLY_SYSTEM: &str = "You are a helpful assistant that outputs valid JSON only.";

pub const PHRASE_SYSTEM: &str =
    "You are a senior e-commerce operator and product poster photography director.";

pub const PHRASE_TOOL_NAME: &str = "generate_scene_phrases";

/// Product shot on a seamless white backdrop.
pub const WHITE_BACKGROUND_PROMPT: &str = "\
Identify the main product in the uploaded photo, ignoring any hands holding it or background clutter.
Recreate it as a premium e-commerce product shot.
Subject isolation: cleanly extract the product and remove all fingers, hands and clutter.
Background: place the product on a pure white studio background (RGB 255, 255, 255) with no shadow at all. \
Remove any contact shadow or gradient so the background is perfectly uniform.
Lighting: soft commercial studio lighting that shows the texture and material, even illumination, no harsh glare.
Retouching: fix lens distortion, sharpen, and color-correct so the product looks brand new.";

/// Wraps one scene phrase for synthesis. `{{}}` receives the phrase.
pub const TEXT_POSITIVE_TEMPLATE: &str = "\
Place the product from the image into a scene with {{}}. The product must fill at least 75% of the frame, \
keep its shape, color, material and texture exactly as photographed, and stay the clear focal point. \
Photorealistic commercial product photography, consistent lighting between product and scene, \
no text, no logos, square 1:1 composition.";

/// Structured synthesis instruction filled per scene from named fields.
pub const STRUCTURED_POSITIVE_TEMPLATE: &str = r#"{
  "foreground": {
    "description": "the product from the uploaded white-background image, shape, color, material and texture unchanged",
    "size_ratio": "between 1/3 and 1/2 of the frame height, camera close to it"
  },
  "accessories": {
    "additional_items": "no extra products or substitutes, keep the frame clean"
  },
  "photography": {
    "camera_style": "realistic product photography with accurate perspective",
    "lighting": "matched to the ambient light of {{scene_name}}, unified shadows, blending naturally into the background",
    "shot_type": "tight composition with the product as foreground",
    "texture": "high definition, fine texture, soft shadows"
  },
  "background": {
    "setting": "{{scene_name}}",
    "description": "{{description}}",
    "elements": ["{{surrounding_objects}}"],
    "details": "{{details}}",
    "atmosphere": "{{selling_point}}, with an atmosphere that fits the scene",
    "lighting": "consistent with the subject to strengthen realism",
    "notes": "no text, no logos, background objects support without stealing focus"
  },
  "aspect_ratio": "1:1"
}
Generate the image strictly following the structured design above."#;

pub fn positive_template(style: PromptStyle) -> &'static str {
    match style {
        PromptStyle::Text => TEXT_POSITIVE_TEMPLATE,
        PromptStyle::Structured => STRUCTURED_POSITIVE_TEMPLATE,
    }
}

pub fn summarizer_prompt(product: &ProductInput) -> String {
    format!(
        r#"Product name: {name}
Product description: {detail}

Task:
Act as a professional e-commerce visual planner and answer with standard JSON.

Step 1: decide whether the reference images match the product name and description.
Step 2: summarize or infer usage scenes that suit this product. If the images do not match, infer scenes from the text.

Output format (must be valid JSON):
{{
  "is_match": boolean,
  "mismatch_reason": string,
  "scene_count": integer,
  "scenes": [
    {{
      "id": integer,
      "scene_name": string,
      "description": string,
      "surrounding_objects": string,
      "details": string,
      "selling_point": string
    }}
  ]
}}

Notes:
1. Return the JSON string directly, without Markdown fences.
2. Scene descriptions must be concrete and visual.
3. Even when the images do not match, recommend scenes based on the product text."#,
        name = product.name,
        detail = product.detail,
    )
}

pub fn refiner_prompt(product: &ProductInput, summary_json: &str, example_json: &str) -> String {
    format!(
        r#"### Role
You are a senior e-commerce operator and poster photography director helping to write scene phrases for product posters. Every description is for a STATIC poster, a single frozen moment, never a video.

### Product
- Name: {name}
- Description: {detail}

### Input JSON
Optimize and extend the following data:
{summary}

### Task 1: optimize existing scenes
1. For every item in `scenes`, improve `description`, `surrounding_objects`, `details` and `selling_point`.
2. Prefer concrete nouns and visual actions over abstract adjectives.
3. Keep sentences simple, in the style of an image-generation prompt.
4. `details` and `selling_point` must describe visible elements or close-ups, not functions.

### Task 2: add new scenes
1. Based on the product and the existing scenes, create 5 additional static product display scenes.
2. Vary usage context (indoor, outdoor, office, leisure), season and time of day, background theme and mood.
3. Do not repeat existing scenes and stay plausible; each new scene highlights the product's character.
4. Give new scenes unique `id` values continuing after the current maximum, and a short distinct `scene_name`.

### Output
Merge the optimized scenes and the 5 new scenes into one `scenes` list. Each item has:
- `id`: unique number
- `scene_name`: the scene theme
- `description`: the overall static picture, without the product itself
- `surrounding_objects`: other objects in frame, comma separated
- `details`: visual details such as light or material close-ups, never the product or a substitute
- `selling_point`: how the picture shows the selling point
- `source`: "optimized" for existing scenes, "new" for added scenes

### Example scene (structure only)
{example}

### Requirements
- Return the complete JSON directly, without Markdown fences.
- The root object must contain at least the `scenes` field."#,
        name = product.name,
        detail = product.detail,
        summary = summary_json,
        example = example_json,
    )
}

pub fn scene_candidates_text(scenes: &[&SceneItem]) -> String {
    let mut text = String::new();
    for (i, scene) in scenes.iter().enumerate() {
        text.push_str(&format!("\n### Scene candidate {}\n", i + 1));
        text.push_str(&format!("- Scene name: {}\n", scene.name));
        text.push_str(&format!("- Scene description: {}\n", scene.description));
        text.push_str(&format!("- Surrounding objects: {}\n", scene.surrounding_objects));
        text.push_str(&format!("- Details: {}\n", scene.details));
        text.push_str(&format!("- Selling point: {}\n", scene.selling_point));
    }
    text
}

pub fn phrase_prompt(
    style: PromptStyle,
    image_num: usize,
    product: &ProductInput,
    candidates: &str,
) -> String {
    match style {
        PromptStyle::Text => format!(
            r#"### Task
Write {image_num} scene phrases for product poster images.
- Product name: {name}
- Product function: {detail}

### Refined scenes (candidates)
Base every phrase strictly on these candidates:
{candidates}

### Rules
1. One phrase per candidate, describing the static background setting, props and light.
2. Never describe the product itself or a substitute for it.
3. Each phrase is a single vivid sentence that completes "a scene with ..."."#,
            name = product.name,
            detail = product.detail,
        ),
        PromptStyle::Structured => format!(
            r#"### Role
You write structured image-generation instructions for product photos.

### Target
Keep the original product photo (shape, color, form) faithful while producing a professional, structured scene description.

### Task
Produce {image_num} sets of fields for the structured template, for:
- Product name: {name}
- Product function: {detail}

### Refined scenes (candidates)
Base every set strictly on these candidates:
{candidates}

### Workflow
1. For each candidate, produce scene_name, description, surrounding_objects, details and selling_point.
2. The text must be visual and suited to professional photography."#,
            name = product.name,
            detail = product.detail,
        ),
    }
}

pub fn phrase_tool(style: PromptStyle, image_num: usize) -> ToolSpec {
    let item = match style {
        PromptStyle::Text => json!({
            "type": "object",
            "properties": {
                "scene_no": {"type": "integer"},
                "scene_description": {"type": "string"}
            },
            "required": ["scene_no", "scene_description"]
        }),
        PromptStyle::Structured => json!({
            "type": "object",
            "properties": {
                "scene_no": {"type": "integer"},
                "scene_name": {"type": "string"},
                "description": {"type": "string"},
                "surrounding_objects": {"type": "string"},
                "details": {"type": "string"},
                "selling_point": {"type": "string"}
            },
            "required": ["scene_no", "scene_name", "description", "surrounding_objects", "details", "selling_point"]
        }),
    };

    ToolSpec {
        name: PHRASE_TOOL_NAME.to_string(),
        description: format!("Generate {} scene descriptions", image_num),
        parameters: json!({
            "type": "object",
            "properties": {
                "scenes": {"type": "array", "items": item}
            },
            "required": ["scenes"]
        }),
    }
}
