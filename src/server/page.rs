//! HTML rendering for the single-page upload UI

use base64::Engine;

use crate::types::prediction::Prediction;
use crate::types::upload::{ImageKind, UploadedImage};

const STYLE: &str = r#"
    body { background-color: #F5F9F3; font-family: "Source Sans Pro", sans-serif; margin: 0; }
    main { max-width: 730px; margin: 0 auto; padding: 48px 16px; }
    .title { color: #2E7D32; text-align: center; font-size: 42px; font-weight: 800; margin: 0 0 8px; }
    .subtitle { text-align: center; color: #4F5D4E; font-size: 18px; margin-bottom: 20px; }
    .upload { padding: 20px; background: white; border-radius: 16px; box-shadow: 0 2px 12px rgba(0,0,0,0.1); }
    .upload button { margin-top: 12px; background: #2E7D32; color: white; border: 0; border-radius: 8px; padding: 8px 20px; font-size: 16px; cursor: pointer; }
    figure { margin: 24px 0 0; text-align: center; }
    figure img { max-width: 100%; border-radius: 8px; }
    figcaption { color: #4F5D4E; font-size: 14px; margin-top: 6px; }
    .result-box { padding: 20px; background: white; border-radius: 16px; box-shadow: 0 2px 12px rgba(0,0,0,0.1); margin-top: 20px; }
    .success { color: #1B5E20; font-size: 26px; font-weight: 700; margin: 4px 0 12px; }
    .label { color: #4E4E4E; font-size: 20px; font-weight: 600; margin: 0; }
    .confidence { font-size: 22px; font-weight: 600; margin: 0; }
    .ranking { color: #4F5D4E; font-size: 15px; margin-top: 12px; }
    .error { color: #B71C1C; font-size: 18px; font-weight: 600; }
"#;

/// What the page shows below the upload form
pub enum PageView<'a> {
    /// No image uploaded yet
    Idle,
    /// Classified upload
    Result {
        upload: &'a UploadedImage,
        kind: ImageKind,
        prediction: &'a Prediction,
    },
    /// The upload could not be classified
    Error { message: String },
}

/// Render the full page
pub fn render(view: &PageView<'_>) -> String {
    let body = match view {
        PageView::Idle => String::new(),
        PageView::Result {
            upload,
            kind,
            prediction,
        } => render_result(upload, *kind, prediction),
        PageView::Error { message } => format!(
            "<div class='result-box'><p class='error'>{}</p></div>",
            escape_html(message)
        ),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Plant Disease Detector</title>
<link rel="icon" href="data:image/svg+xml,<svg xmlns=%22http://www.w3.org/2000/svg%22 viewBox=%220 0 100 100%22><text y=%22.9em%22 font-size=%2290%22>&#x1F331;</text></svg>">
<style>{style}</style>
</head>
<body>
<main>
<h1 class="title">&#x1F33F; Plant Disease Detection</h1>
<p class="subtitle">Upload a leaf image and let the AI predict the disease.</p>
<form class="upload" method="post" action="/" enctype="multipart/form-data">
<label for="file">&#x1F4F8; Upload Leaf Image</label><br>
<input id="file" name="file" type="file" accept="{accept}">
<br><button type="submit">Predict</button>
</form>
{body}
</main>
</body>
</html>
"#,
        style = STYLE,
        accept = accept_attribute(),
        body = body,
    )
}

fn render_result(upload: &UploadedImage, kind: ImageKind, prediction: &Prediction) -> String {
    let ranking: String = prediction
        .top_k
        .iter()
        .skip(1)
        .map(|score| {
            format!(
                "<li>{} &mdash; {:.2}%</li>",
                escape_html(&score.label),
                score.probability * 100.0
            )
        })
        .collect();
    let ranking = if ranking.is_empty() {
        String::new()
    } else {
        format!("<div class='ranking'>Other candidates:<ul>{ranking}</ul></div>")
    };

    format!(
        r#"<figure>
<img src="{src}" alt="{name}">
<figcaption>Uploaded Image &middot; {name}</figcaption>
</figure>
<div class="result-box">
<p class="label">Prediction:</p>
<p class="success">{label}</p>
<p class="confidence">&#x1F522; Confidence: <strong>{confidence}</strong></p>
{ranking}
</div>
"#,
        src = data_url(upload, kind),
        name = escape_html(upload.display_name()),
        label = escape_html(&prediction.label),
        confidence = prediction.confidence_display(),
        ranking = ranking,
    )
}

/// Inline the uploaded bytes so the page can show the image without storing it
pub fn data_url(upload: &UploadedImage, kind: ImageKind) -> String {
    format!(
        "data:{};base64,{}",
        kind.mime(),
        base64::engine::general_purpose::STANDARD.encode(&upload.bytes)
    )
}

fn accept_attribute() -> String {
    ImageKind::EXTENSIONS
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::prediction::ClassScore;

    #[test]
    fn test_idle_page_has_upload_form() {
        let html = render(&PageView::Idle);
        assert!(html.contains("Plant Disease Detection"));
        assert!(html.contains(r#"accept=".jpg,.jpeg,.png""#));
        assert!(!html.contains("Prediction:"));
    }

    #[test]
    fn test_result_page_shows_image_label_and_confidence() {
        let upload = UploadedImage::new(vec![1, 2, 3]).with_file_name("leaf<1>.png");
        let best = ClassScore {
            class_index: 9,
            label: "Tomato Healthy".to_string(),
            probability: 0.923,
        };
        let prediction = Prediction::new(&best, "leaf").with_top_k(vec![best.clone()]);

        let html = render(&PageView::Result {
            upload: &upload,
            kind: ImageKind::Png,
            prediction: &prediction,
        });

        assert!(html.contains("data:image/png;base64,AQID"));
        assert!(html.contains("leaf&lt;1&gt;.png"));
        assert!(html.contains("<p class=\"success\">Tomato Healthy</p>"));
        assert!(html.contains("92.30%"));
    }

    #[test]
    fn test_error_message_is_escaped() {
        let html = render(&PageView::Error {
            message: "<script>alert(1)</script>".to_string(),
        });
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
