// diary-pdf: Generate daily class diary PDFs for Al-Ghazali High School

use ::image::{DynamicImage, Rgba, RgbImage};
use chrono::{Local, NaiveDate, Utc};
use chrono_tz::Tz;
use clap::Parser;
use printpdf::path::{PaintMode, WindingOrder};
use printpdf::*;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// A4 dimensions in mm
const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;

/// Side margins
const MARGIN_MM: f32 = 18.0;
const CONTENT_WIDTH_MM: f32 = PAGE_WIDTH_MM - 2.0 * MARGIN_MM;

/// Header band reserved across the top of every page
const HEADER_BAND_MM: f32 = 46.0;

/// Where body content starts, below the header band
const BODY_TOP_MM: f32 = PAGE_HEIGHT_MM - HEADER_BAND_MM - 8.0;

/// Body content must stop above the footer band
const BOTTOM_MARGIN_MM: f32 = 26.0;

/// Logo box inside the header band
const LOGO_BOX_MM: f32 = 28.0;
const LOGO_INSET_MM: f32 = 20.0;

/// Font sizes in points
const TITLE_FONT_SIZE: f32 = 18.0;
const SUBTITLE_FONT_SIZE: f32 = 14.0;
const HEADING_FONT_SIZE: f32 = 12.0;
const TABLE_HEADER_FONT_SIZE: f32 = 11.0;
const BODY_FONT_SIZE: f32 = 10.0;
const SMALL_FONT_SIZE: f32 = 8.0;

/// Table geometry
const BODY_LINE_MM: f32 = 4.4;
const CELL_PAD_MM: f32 = 2.5;
const HEADER_ROW_HEIGHT_MM: f32 = 9.0;
const HEADING_BAR_MM: f32 = 9.0;
const TABLE_GAP_MM: f32 = 9.0;

const PT_TO_MM: f32 = 0.352778;

/// Branding text
const SCHOOL_NAME: &str = "AL-GHAZALI HIGH SCHOOL";
const DOC_SUBTITLE: &str = "Daily Class Diary";
const FOOTER_ATTRIBUTION: &str = "Generated by IT Department - Al-Ghazali High School";
const SUBJECTS_HEADING: &str = "SUBJECT-WISE DIARY ENTRIES";
const NOTES_HEADING: &str = "ADDITIONAL NOTES & ANNOUNCEMENTS";

/// Default logo asset paths; both are optional at runtime
const LEFT_LOGO_PATH: &str = "assets/school_logo.png";
const RIGHT_LOGO_PATH: &str = "assets/school_logo_right.png";

/// Palette (RGB, 0..1)
const NAVY: (f32, f32, f32) = (0.102, 0.212, 0.365);
const SLATE: (f32, f32, f32) = (0.176, 0.216, 0.282);
const BRAND_BLUE: (f32, f32, f32) = (0.169, 0.424, 0.690);
const MIST: (f32, f32, f32) = (0.969, 0.980, 0.988);
const BORDER_GRAY: (f32, f32, f32) = (0.886, 0.910, 0.941);
const FOOTNOTE_GRAY: (f32, f32, f32) = (0.443, 0.502, 0.588);
const NOTES_GREEN: (f32, f32, f32) = (0.220, 0.631, 0.412);
const WHITE: (f32, f32, f32) = (1.0, 1.0, 1.0);

/// Display names for the standard subject keys. Unknown keys fall back to
/// title-casing, which is how custom subjects entered in the form show up.
const SUBJECT_NAMES: &[(&str, &str)] = &[
    ("english", "English & WorkBook"),
    ("urdu", "Urdu"),
    ("math", "Mathematics"),
    ("science", "Science"),
    ("islamiat", "Islamic Studies"),
    ("nardban", "Nardban"),
    ("masharti_ulom", "Masharti Ulom"),
    ("rasool_e_arabi", "Rasool e Arabi"),
];

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to create PDF: {0}")]
    PdfError(String),
    #[error("Failed to read entries file: {0}")]
    EntriesError(String),
    #[error("Invalid date format: {0}")]
    DateError(String),
    #[error("Invalid subject entry (expected KEY=TEXT): {0}")]
    SubjectError(String),
    #[error("Failed to write {path}: {source}")]
    WriteError {
        path: String,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// ============================================================================
// Data Structures
// ============================================================================

/// CLI Arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Generate daily class diary PDFs")]
struct Args {
    /// Diary date (YYYY-MM-DD format, defaults to today)
    #[arg(short, long)]
    date: Option<String>,

    /// Class/grade label (e.g. "5")
    #[arg(short, long)]
    class: String,

    /// Section within the class (e.g. "A")
    #[arg(short, long)]
    section: Option<String>,

    /// Class teacher's name
    #[arg(short, long)]
    teacher: Option<String>,

    /// Subject entry as KEY=TEXT (repeatable, order preserved)
    #[arg(long = "subject", value_name = "KEY=TEXT")]
    subjects: Vec<String>,

    /// Subject entries file (JSON array of {"subject", "text"} objects)
    #[arg(long)]
    entries: Option<String>,

    /// General notes and announcements
    #[arg(short, long)]
    notes: Option<String>,

    /// Output directory for the generated PDF
    #[arg(short, long, default_value = "output")]
    output_dir: String,

    /// Left header logo (file path or URL)
    #[arg(long, default_value = LEFT_LOGO_PATH)]
    left_logo: String,

    /// Right header logo (file path or URL)
    #[arg(long, default_value = RIGHT_LOGO_PATH)]
    right_logo: String,
}

/// Subject entry from a JSON entries file
#[derive(Debug, Deserialize)]
struct SubjectEntry {
    subject: String,
    #[serde(default)]
    text: String,
}

/// One day's class diary, as collected by the form front end
#[derive(Debug, Clone)]
struct DiaryRecord {
    date: NaiveDate,
    class_label: String,
    section: Option<String>,
    teacher: Option<String>,
    /// subject key -> free text, in entry order
    subjects: Vec<(String, String)>,
    notes: Option<String>,
}

/// A renderable unit of page body content
#[derive(Debug, PartialEq)]
enum Block {
    Heading(&'static str),
    Table(TableBlock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    Info,
    Subjects,
    Notes,
}

#[derive(Debug, PartialEq)]
struct TableBlock {
    kind: TableKind,
    header: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

impl TableKind {
    fn column_widths(self) -> &'static [f32] {
        match self {
            TableKind::Info => &[24.0, 57.0, 24.0, 57.0],
            TableKind::Subjects | TableKind::Notes => &[50.0, 115.0],
        }
    }
}

#[derive(Clone, Copy)]
enum LogoSide {
    Left,
    Right,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let args = Args::parse();

    let date = parse_date(&args.date)?;

    // Entries file first, then any --subject flags, in order
    let mut subjects = load_entries(&args.entries)?;
    for raw in &args.subjects {
        subjects.push(parse_subject_arg(raw)?);
    }

    let record = DiaryRecord {
        date,
        class_label: args.class,
        section: args.section,
        teacher: args.teacher,
        subjects,
        notes: args.notes,
    };

    let left_logo = load_logo(&args.left_logo);
    let right_logo = load_logo(&args.right_logo);

    let path = render_diary(&record, Path::new(&args.output_dir), left_logo, right_logo)?;

    println!("✓ Generated: {}", path.display());
    println!("  Class: {}", record.class_label);
    println!("  Date: {}", format_date_display(record.date));

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_date(date_str: &Option<String>) -> Result<NaiveDate, AppError> {
    match date_str {
        Some(s) => {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| AppError::DateError(s.clone()))
        }
        None => Ok(Local::now().date_naive()),
    }
}

fn parse_subject_arg(raw: &str) -> Result<(String, String), AppError> {
    match raw.split_once('=') {
        Some((key, text)) => Ok((key.trim().to_lowercase(), text.to_string())),
        None => Err(AppError::SubjectError(raw.to_string())),
    }
}

fn load_entries(path: &Option<String>) -> Result<Vec<(String, String)>, AppError> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)
                .map_err(|e| AppError::EntriesError(format!("{}: {}", p, e)))?;
            let entries: Vec<SubjectEntry> = serde_json::from_str(&content)
                .map_err(|e| AppError::EntriesError(format!("Invalid JSON: {}", e)))?;
            Ok(entries
                .into_iter()
                .map(|e| (e.subject.to_lowercase(), e.text))
                .collect())
        }
        None => Ok(Vec::new()),
    }
}

/// Loads a header logo from a file path or URL. A missing asset is not an
/// error; the header is simply drawn without it. Fetch and decode failures
/// get a warning and the same treatment.
fn load_logo(source: &str) -> Option<DynamicImage> {
    let image_bytes = if source.starts_with("http://") || source.starts_with("https://") {
        let response = match ureq::get(source).call() {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Warning: could not fetch logo {}: {}", source, e);
                return None;
            }
        };
        let mut bytes = Vec::new();
        if let Err(e) = response.into_reader().read_to_end(&mut bytes) {
            eprintln!("Warning: could not read logo {}: {}", source, e);
            return None;
        }
        bytes
    } else {
        match std::fs::read(source) {
            Ok(bytes) => bytes,
            Err(_) => return None,
        }
    };

    match ::image::load_from_memory(&image_bytes) {
        Ok(img) => Some(img),
        Err(e) => {
            eprintln!("Warning: could not decode logo {}: {}", source, e);
            None
        }
    }
}

fn format_date_display(date: NaiveDate) -> String {
    date.format("%A, %B %d, %Y").to_string()
}

/// Output filename: `diary_<class>_<YYYY_MM_DD>.pdf`, spaces in the class
/// label replaced with underscores. Depends on nothing else in the record.
fn diary_filename(class_label: &str, date: NaiveDate) -> String {
    let class_part = class_label.trim().replace(' ', "_");
    format!("diary_{}_{}.pdf", class_part, date.format("%Y_%m_%d"))
}

/// Footer timestamp in Pakistan time, falling back to local time if the
/// zone cannot be resolved. Never fails.
fn generation_timestamp() -> String {
    match "Asia/Karachi".parse::<Tz>() {
        Ok(zone) => Utc::now()
            .with_timezone(&zone)
            .format("%B %d, %Y at %I:%M %p PKT")
            .to_string(),
        Err(_) => Local::now().format("%B %d, %Y at %I:%M %p").to_string(),
    }
}

// ============================================================================
// Text Sanitizer
// ============================================================================

/// Makes user-entered text safe for the PDF layout engine, which only
/// reliably renders printable ASCII. Smart punctuation is normalized,
/// control whitespace becomes a space, everything else non-ASCII becomes
/// `?`. Total and idempotent.
fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201F}' => '"',
            '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
            '\t' | '\n' | '\r' => ' ',
            ' '..='~' => c,
            _ => '?',
        })
        .collect()
}

/// Uppercases the first letter of each alphabetic run, keeping separators,
/// so "masharti_ulom" -> "Masharti_Ulom" and "computer science" ->
/// "Computer Science".
fn title_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut at_word_start = true;
    for c in key.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn display_subject_name(key: &str) -> String {
    SUBJECT_NAMES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| title_case(key))
}

// ============================================================================
// Layout Assembly
// ============================================================================

fn nonblank(value: Option<&str>) -> Option<&str> {
    match value {
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        None => None,
    }
}

/// Converts a diary record into the ordered body blocks: info table,
/// subject table (with a fallback row so it is never empty), and the notes
/// table when there are notes. Pure; performs no I/O.
fn assemble_blocks(record: &DiaryRecord) -> Vec<Block> {
    let mut blocks = Vec::new();

    // Info table
    let mut level = sanitize_text(record.class_label.trim());
    if let Some(section) = nonblank(record.section.as_deref()) {
        level = format!("{} - Section {}", level, sanitize_text(section));
    }
    let mut info_rows = vec![vec![
        "Date:".to_string(),
        format_date_display(record.date),
        "Level:".to_string(),
        level,
    ]];
    if let Some(teacher) = nonblank(record.teacher.as_deref()) {
        info_rows.push(vec![
            "Teacher:".to_string(),
            sanitize_text(teacher),
            String::new(),
            String::new(),
        ]);
    }
    blocks.push(Block::Table(TableBlock {
        kind: TableKind::Info,
        header: None,
        rows: info_rows,
    }));

    // Subject table
    blocks.push(Block::Heading(SUBJECTS_HEADING));
    let mut subject_rows = Vec::new();
    for (key, text) in &record.subjects {
        let cleaned = sanitize_text(text);
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            subject_rows.push(vec![
                sanitize_text(&display_subject_name(key)),
                trimmed.to_string(),
            ]);
        }
    }
    if subject_rows.is_empty() {
        subject_rows.push(vec![
            "No entries".to_string(),
            "No homework assigned for today".to_string(),
        ]);
    }
    blocks.push(Block::Table(TableBlock {
        kind: TableKind::Subjects,
        header: Some(vec!["Subject".to_string(), "Homework / Notes".to_string()]),
        rows: subject_rows,
    }));

    // Notes table, only when there is something to say
    if let Some(notes) = nonblank(record.notes.as_deref()) {
        blocks.push(Block::Heading(NOTES_HEADING));
        blocks.push(Block::Table(TableBlock {
            kind: TableKind::Notes,
            header: None,
            rows: vec![vec![
                "Additional Information".to_string(),
                sanitize_text(notes),
            ]],
        }));
    }

    blocks
}

// ============================================================================
// PDF Generation
// ============================================================================

/// Per-page decoration context: fonts, logos and the footer timestamp,
/// shared by every page of the document.
struct PageChrome<'a> {
    font_regular: &'a IndirectFontRef,
    font_bold: &'a IndirectFontRef,
    left_logo: Option<&'a DynamicImage>,
    right_logo: Option<&'a DynamicImage>,
    generated_at: &'a str,
}

/// Tracks the current page and write position while body blocks flow down
/// the page. Adding a page redraws the header/footer chrome.
struct PageCursor<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    chrome: &'a PageChrome<'a>,
    y: f32,
    page_num: u32,
}

impl<'a> PageCursor<'a> {
    fn ensure_space(&mut self, needed: f32) {
        if self.y - needed < BOTTOM_MARGIN_MM {
            self.new_page();
        }
    }

    fn new_page(&mut self) {
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.page_num += 1;
        draw_page_chrome(&self.layer, self.chrome, self.page_num);
        self.y = BODY_TOP_MM;
    }
}

/// Renders the record into `<output_dir>/diary_<class>_<date>.pdf` and
/// returns the path. The right logo falls back to the left image when its
/// own asset is absent; missing both just leaves the band blank.
fn render_diary(
    record: &DiaryRecord,
    output_dir: &Path,
    left_logo: Option<DynamicImage>,
    right_logo: Option<DynamicImage>,
) -> Result<PathBuf, AppError> {
    let blocks = assemble_blocks(record);

    let (doc, page1, layer1) = PdfDocument::new(
        DOC_SUBTITLE,
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );

    let font_regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| AppError::PdfError(e.to_string()))?;
    let font_bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| AppError::PdfError(e.to_string()))?;

    let generated_at = generation_timestamp();
    let right_logo = right_logo.or_else(|| left_logo.clone());
    let chrome = PageChrome {
        font_regular: &font_regular,
        font_bold: &font_bold,
        left_logo: left_logo.as_ref(),
        right_logo: right_logo.as_ref(),
        generated_at: &generated_at,
    };

    {
        let layer = doc.get_page(page1).get_layer(layer1);
        draw_page_chrome(&layer, &chrome, 1);

        let mut cursor = PageCursor {
            doc: &doc,
            layer,
            chrome: &chrome,
            y: BODY_TOP_MM,
            page_num: 1,
        };

        for block in &blocks {
            match block {
                Block::Heading(text) => draw_heading(&mut cursor, text),
                Block::Table(table) => draw_table(&mut cursor, table),
            }
        }
    }

    std::fs::create_dir_all(output_dir).map_err(|e| AppError::WriteError {
        path: output_dir.display().to_string(),
        source: e,
    })?;
    let path = output_dir.join(diary_filename(&record.class_label, record.date));
    let file = File::create(&path).map_err(|e| AppError::WriteError {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    doc.save(&mut writer)
        .map_err(|e| AppError::PdfError(e.to_string()))?;

    Ok(path)
}

/// Draws the header and footer band. Called once for every page, first and
/// continuation pages alike.
fn draw_page_chrome(layer: &PdfLayerReference, chrome: &PageChrome, page_num: u32) {
    // Shaded header band with a blue rule closing it
    fill_rect(
        layer,
        0.0,
        PAGE_HEIGHT_MM - HEADER_BAND_MM,
        PAGE_WIDTH_MM,
        HEADER_BAND_MM,
        rgb(MIST),
    );
    layer.set_outline_color(rgb(BRAND_BLUE));
    layer.set_outline_thickness(1.0);
    draw_line(
        layer,
        0.0,
        PAGE_HEIGHT_MM - HEADER_BAND_MM,
        PAGE_WIDTH_MM,
        PAGE_HEIGHT_MM - HEADER_BAND_MM,
    );

    let logo_top = PAGE_HEIGHT_MM - 9.0;
    if let Some(logo) = chrome.left_logo {
        embed_logo(layer, logo, LogoSide::Left, logo_top);
    }
    if let Some(logo) = chrome.right_logo {
        embed_logo(layer, logo, LogoSide::Right, logo_top);
    }

    layer.set_fill_color(rgb(NAVY));
    draw_text_centered(
        layer,
        SCHOOL_NAME,
        TITLE_FONT_SIZE,
        PAGE_WIDTH_MM / 2.0,
        PAGE_HEIGHT_MM - 21.0,
        chrome.font_bold,
    );
    layer.set_fill_color(rgb(SLATE));
    draw_text_centered(
        layer,
        DOC_SUBTITLE,
        SUBTITLE_FONT_SIZE,
        PAGE_WIDTH_MM / 2.0,
        PAGE_HEIGHT_MM - 30.0,
        chrome.font_bold,
    );

    // Footer: attribution, timestamp, page number, thin rule
    layer.set_fill_color(rgb(FOOTNOTE_GRAY));
    draw_text_centered(
        layer,
        FOOTER_ATTRIBUTION,
        SMALL_FONT_SIZE,
        PAGE_WIDTH_MM / 2.0,
        16.0,
        chrome.font_regular,
    );
    let created_line = format!("Created on {}", chrome.generated_at);
    draw_text_centered(
        layer,
        &created_line,
        SMALL_FONT_SIZE,
        PAGE_WIDTH_MM / 2.0,
        11.5,
        chrome.font_regular,
    );
    let page_label = format!("Page {}", page_num);
    let label_width = text_width_mm(&page_label, SMALL_FONT_SIZE);
    layer.use_text(
        &page_label,
        SMALL_FONT_SIZE,
        Mm(PAGE_WIDTH_MM - MARGIN_MM - label_width),
        Mm(11.5),
        chrome.font_regular,
    );
    layer.set_outline_color(rgb(BORDER_GRAY));
    layer.set_outline_thickness(0.3);
    draw_line(layer, MARGIN_MM, 8.0, PAGE_WIDTH_MM - MARGIN_MM, 8.0);
}

fn draw_heading(cursor: &mut PageCursor, text: &str) {
    // Keep the bar together with at least one body line
    cursor.ensure_space(HEADING_BAR_MM + 5.0 + BODY_LINE_MM);
    let y_bottom = cursor.y - HEADING_BAR_MM;
    fill_rect(
        &cursor.layer,
        MARGIN_MM,
        y_bottom,
        CONTENT_WIDTH_MM,
        HEADING_BAR_MM,
        rgb(BRAND_BLUE),
    );
    cursor.layer.set_fill_color(rgb(WHITE));
    draw_text_centered(
        &cursor.layer,
        text,
        HEADING_FONT_SIZE,
        PAGE_WIDTH_MM / 2.0,
        y_bottom + 3.0,
        cursor.chrome.font_bold,
    );
    cursor.y = y_bottom - 5.0;
}

fn draw_table(cursor: &mut PageCursor, table: &TableBlock) {
    let widths = table.kind.column_widths();
    let total_width: f32 = widths.iter().sum();
    let x0 = (PAGE_WIDTH_MM - total_width) / 2.0;

    if let Some(header) = &table.header {
        cursor.ensure_space(HEADER_ROW_HEIGHT_MM + BODY_LINE_MM + 2.0 * CELL_PAD_MM);
        let y_top = cursor.y;
        fill_rect(
            &cursor.layer,
            x0,
            y_top - HEADER_ROW_HEIGHT_MM,
            total_width,
            HEADER_ROW_HEIGHT_MM,
            rgb(BRAND_BLUE),
        );
        cursor.layer.set_fill_color(rgb(WHITE));
        let mut x = x0;
        for (cell, width) in header.iter().zip(widths) {
            draw_text_centered(
                &cursor.layer,
                cell,
                TABLE_HEADER_FONT_SIZE,
                x + width / 2.0,
                y_top - HEADER_ROW_HEIGHT_MM + 3.2,
                cursor.chrome.font_bold,
            );
            x += width;
        }
        // Heavier rule under the header row
        cursor.layer.set_outline_color(rgb(BRAND_BLUE));
        cursor.layer.set_outline_thickness(0.7);
        draw_line(
            &cursor.layer,
            x0,
            y_top - HEADER_ROW_HEIGHT_MM,
            x0 + total_width,
            y_top - HEADER_ROW_HEIGHT_MM,
        );
        cursor.y = y_top - HEADER_ROW_HEIGHT_MM;
    }

    let full_page_height = BODY_TOP_MM - BOTTOM_MARGIN_MM;
    for (row_idx, row) in table.rows.iter().enumerate() {
        let wrapped: Vec<Vec<String>> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| wrap_text(cell, width - 2.0 * CELL_PAD_MM, BODY_FONT_SIZE))
            .collect();
        let line_count = wrapped.iter().map(|lines| lines.len()).max().unwrap_or(1);
        let row_height = line_count as f32 * BODY_LINE_MM + 2.0 * CELL_PAD_MM;

        // Move whole rows to the next page when they would fit there; rows
        // taller than a full page get split line-by-line below.
        if cursor.y - row_height < BOTTOM_MARGIN_MM && row_height <= full_page_height {
            cursor.new_page();
        }

        let mut start = 0;
        while start < line_count {
            let fit = (((cursor.y - BOTTOM_MARGIN_MM - 2.0 * CELL_PAD_MM) / BODY_LINE_MM) as usize)
                .min(line_count - start);
            if fit == 0 {
                cursor.new_page();
                continue;
            }
            let segment_height = fit as f32 * BODY_LINE_MM + 2.0 * CELL_PAD_MM;
            draw_row_segment(
                &cursor.layer,
                cursor.chrome,
                table.kind,
                x0,
                widths,
                &wrapped,
                start,
                fit,
                row_idx,
                cursor.y,
            );
            cursor.y -= segment_height;
            start += fit;
        }
    }

    cursor.y -= TABLE_GAP_MM;
}

fn draw_row_segment(
    layer: &PdfLayerReference,
    chrome: &PageChrome,
    kind: TableKind,
    x0: f32,
    widths: &[f32],
    wrapped: &[Vec<String>],
    start: usize,
    count: usize,
    row_idx: usize,
    y_top: f32,
) {
    let total_width: f32 = widths.iter().sum();
    let segment_height = count as f32 * BODY_LINE_MM + 2.0 * CELL_PAD_MM;

    // Cell backgrounds
    match kind {
        TableKind::Info => {
            fill_rect(
                layer,
                x0,
                y_top - segment_height,
                total_width,
                segment_height,
                rgb(MIST),
            );
        }
        TableKind::Subjects => {
            if row_idx % 2 == 1 {
                fill_rect(
                    layer,
                    x0,
                    y_top - segment_height,
                    total_width,
                    segment_height,
                    rgb(MIST),
                );
            }
        }
        TableKind::Notes => {
            fill_rect(
                layer,
                x0,
                y_top - segment_height,
                widths[0],
                segment_height,
                rgb(NOTES_GREEN),
            );
        }
    }

    // Grid
    layer.set_outline_color(rgb(BORDER_GRAY));
    layer.set_outline_thickness(0.3);
    let mut grid_x = x0;
    for width in widths {
        stroke_rect(layer, grid_x, y_top - segment_height, *width, segment_height);
        grid_x += width;
    }

    // Cell text
    let mut x = x0;
    for (col, (cell_lines, width)) in wrapped.iter().zip(widths).enumerate() {
        let (font, color) = cell_style(kind, col, chrome);
        layer.set_fill_color(color);
        let mut text_y = y_top - CELL_PAD_MM - 3.2;
        for line in cell_lines.iter().skip(start).take(count) {
            layer.use_text(line, BODY_FONT_SIZE, Mm(x + CELL_PAD_MM), Mm(text_y), font);
            text_y -= BODY_LINE_MM;
        }
        x += width;
    }
}

fn cell_style<'a>(
    kind: TableKind,
    col: usize,
    chrome: &PageChrome<'a>,
) -> (&'a IndirectFontRef, Color) {
    match kind {
        // Label columns bold, value columns regular
        TableKind::Info => {
            if col % 2 == 0 {
                (chrome.font_bold, rgb(SLATE))
            } else {
                (chrome.font_regular, rgb(SLATE))
            }
        }
        TableKind::Subjects => {
            if col == 0 {
                (chrome.font_bold, rgb(SLATE))
            } else {
                (chrome.font_regular, rgb(SLATE))
            }
        }
        TableKind::Notes => {
            if col == 0 {
                (chrome.font_bold, rgb(WHITE))
            } else {
                (chrome.font_regular, rgb(SLATE))
            }
        }
    }
}

fn embed_logo(layer: &PdfLayerReference, logo_image: &DynamicImage, side: LogoSide, top_y: f32) {
    // Composite against white so transparent PNGs blend into the band
    let rgba_image = logo_image.to_rgba8();
    let (width_px, height_px) = rgba_image.dimensions();
    if width_px == 0 || height_px == 0 {
        return;
    }
    let mut rgb_image = RgbImage::new(width_px, height_px);
    for (x, y, pixel) in rgba_image.enumerate_pixels() {
        let Rgba([r, g, b, a]) = *pixel;
        let alpha = a as f32 / 255.0;
        let bg = 255.0;
        let out_r = (r as f32 * alpha + bg * (1.0 - alpha)) as u8;
        let out_g = (g as f32 * alpha + bg * (1.0 - alpha)) as u8;
        let out_b = (b as f32 * alpha + bg * (1.0 - alpha)) as u8;
        rgb_image.put_pixel(x, y, ::image::Rgb([out_r, out_g, out_b]));
    }

    // Fit into the logo box preserving aspect ratio
    let aspect_ratio = width_px as f32 / height_px as f32;
    let (final_width_mm, final_height_mm) = if aspect_ratio < 1.0 {
        (LOGO_BOX_MM * aspect_ratio, LOGO_BOX_MM)
    } else {
        (LOGO_BOX_MM, LOGO_BOX_MM / aspect_ratio)
    };

    let x = match side {
        LogoSide::Left => LOGO_INSET_MM,
        LogoSide::Right => PAGE_WIDTH_MM - LOGO_INSET_MM - final_width_mm,
    };
    let y = top_y - final_height_mm;

    let raw_pixels = rgb_image.into_raw();
    let image = Image::from(ImageXObject {
        width: Px(width_px as usize),
        height: Px(height_px as usize),
        color_space: ColorSpace::Rgb,
        bits_per_component: ColorBits::Bit8,
        interpolate: true,
        image_data: raw_pixels,
        image_filter: None,
        clipping_bbox: None,
        smask: None,
    });

    // DPI chosen so the pixel width lands on the desired physical width
    let dpi = (width_px as f32) / (final_width_mm / 25.4);

    image.add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(x)),
            translate_y: Some(Mm(y)),
            dpi: Some(dpi),
            ..Default::default()
        },
    );
}

// ============================================================================
// Drawing Utilities
// ============================================================================

fn rgb(color: (f32, f32, f32)) -> Color {
    Color::Rgb(Rgb::new(color.0, color.1, color.2, None))
}

fn draw_line(layer: &PdfLayerReference, x1: f32, y1: f32, x2: f32, y2: f32) {
    let points = vec![
        (Point::new(Mm(x1), Mm(y1)), false),
        (Point::new(Mm(x2), Mm(y2)), false),
    ];
    let line = Line {
        points,
        is_closed: false,
    };
    layer.add_line(line);
}

fn rect_ring(x: f32, y: f32, width: f32, height: f32) -> Vec<(Point, bool)> {
    vec![
        (Point::new(Mm(x), Mm(y)), false),
        (Point::new(Mm(x + width), Mm(y)), false),
        (Point::new(Mm(x + width), Mm(y + height)), false),
        (Point::new(Mm(x), Mm(y + height)), false),
    ]
}

fn fill_rect(layer: &PdfLayerReference, x: f32, y: f32, width: f32, height: f32, color: Color) {
    layer.set_fill_color(color);
    layer.add_polygon(Polygon {
        rings: vec![rect_ring(x, y, width, height)],
        mode: PaintMode::Fill,
        winding_order: WindingOrder::NonZero,
    });
}

fn stroke_rect(layer: &PdfLayerReference, x: f32, y: f32, width: f32, height: f32) {
    layer.add_polygon(Polygon {
        rings: vec![rect_ring(x, y, width, height)],
        mode: PaintMode::Stroke,
        winding_order: WindingOrder::NonZero,
    });
}

/// Estimated glyph width in em units for the builtin Helvetica faces. Close
/// enough for wrapping and centering; cell padding absorbs the error.
fn char_em_width(c: char) -> f32 {
    match c {
        'i' | 'j' | 'l' | 'I' | '.' | ',' | ':' | ';' | '!' | '\'' | '|' => 0.28,
        'f' | 't' | 'r' | '(' | ')' | '[' | ']' | '-' | ' ' | '/' => 0.36,
        'm' | 'w' | 'M' | 'W' | '@' | '&' => 0.89,
        'A'..='Z' | '0'..='9' | '?' => 0.67,
        _ => 0.52,
    }
}

fn text_width_mm(text: &str, font_size: f32) -> f32 {
    text.chars().map(char_em_width).sum::<f32>() * font_size * PT_TO_MM
}

fn draw_text_centered(
    layer: &PdfLayerReference,
    text: &str,
    font_size: f32,
    center_x: f32,
    y: f32,
    font: &IndirectFontRef,
) {
    let x = center_x - text_width_mm(text, font_size) / 2.0;
    layer.use_text(text, font_size, Mm(x), Mm(y), font);
}

/// Greedy word wrap to a column width. Words wider than the column are
/// hard-split so content is never dropped.
fn wrap_text(text: &str, max_width_mm: f32, font_size: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        for piece in split_long_word(word, max_width_mm, font_size) {
            let candidate = if current.is_empty() {
                piece.clone()
            } else {
                format!("{} {}", current, piece)
            };
            if text_width_mm(&candidate, font_size) > max_width_mm && !current.is_empty() {
                lines.push(current);
                current = piece;
            } else {
                current = candidate;
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn split_long_word(word: &str, max_width_mm: f32, font_size: f32) -> Vec<String> {
    if text_width_mm(word, font_size) <= max_width_mm {
        return vec![word.to_string()];
    }
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut width = 0.0;
    for c in word.chars() {
        let char_width = char_em_width(c) * font_size * PT_TO_MM;
        if width + char_width > max_width_mm && !piece.is_empty() {
            pieces.push(piece);
            piece = String::new();
            width = 0.0;
        }
        piece.push(c);
        width += char_width;
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: (i32, u32, u32)) -> DiaryRecord {
        DiaryRecord {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            class_label: "5".to_string(),
            section: None,
            teacher: None,
            subjects: Vec::new(),
            notes: None,
        }
    }

    fn subject_table(blocks: &[Block]) -> &TableBlock {
        blocks
            .iter()
            .find_map(|b| match b {
                Block::Table(t) if t.kind == TableKind::Subjects => Some(t),
                _ => None,
            })
            .expect("subject table missing")
    }

    fn info_table(blocks: &[Block]) -> &TableBlock {
        blocks
            .iter()
            .find_map(|b| match b {
                Block::Table(t) if t.kind == TableKind::Info => Some(t),
                _ => None,
            })
            .expect("info table missing")
    }

    fn has_notes_table(blocks: &[Block]) -> bool {
        blocks
            .iter()
            .any(|b| matches!(b, Block::Table(t) if t.kind == TableKind::Notes))
    }

    // ---- sanitizer ----

    #[test]
    fn sanitize_keeps_printable_ascii() {
        let input = "Page 12 Q1-5, review Ch. 3 (all of it)!";
        assert_eq!(sanitize_text(input), input);
    }

    #[test]
    fn sanitize_normalizes_smart_punctuation() {
        assert_eq!(sanitize_text("\u{2018}quo\u{2019}"), "'quo'");
        assert_eq!(sanitize_text("\u{201C}word\u{201D}"), "\"word\"");
        assert_eq!(sanitize_text("a\u{2013}b\u{2014}c"), "a-b-c");
    }

    #[test]
    fn sanitize_replaces_non_ascii_with_placeholder() {
        assert_eq!(sanitize_text("caf\u{e9}"), "caf?");
        assert_eq!(sanitize_text("\u{1F600}"), "?");
        assert_eq!(sanitize_text("\u{0627}\u{0631}\u{062F}\u{0648}"), "????");
    }

    #[test]
    fn sanitize_maps_control_whitespace_to_space() {
        assert_eq!(sanitize_text("a\nb\tc\r"), "a b c ");
    }

    #[test]
    fn sanitize_empty_is_empty() {
        assert_eq!(sanitize_text(""), "");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "",
            "plain text",
            "\u{2018}smart\u{2019} \u{201C}quotes\u{201D} \u{2014} dash",
            "caf\u{e9} \u{1F600}\nnewline",
            "already ? sanitized",
        ];
        for input in inputs {
            let once = sanitize_text(input);
            assert_eq!(sanitize_text(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn sanitize_output_is_printable_ascii() {
        let input = "mixed \u{2019} caf\u{e9}\n\u{1F600} end";
        for c in sanitize_text(input).chars() {
            assert!((' '..='~').contains(&c), "non-printable {:?}", c);
        }
    }

    // ---- subject names ----

    #[test]
    fn known_subject_keys_use_display_table() {
        assert_eq!(display_subject_name("math"), "Mathematics");
        assert_eq!(display_subject_name("english"), "English & WorkBook");
        assert_eq!(display_subject_name("islamiat"), "Islamic Studies");
    }

    #[test]
    fn unknown_subject_keys_are_title_cased() {
        assert_eq!(display_subject_name("chemistry"), "Chemistry");
        assert_eq!(display_subject_name("computer science"), "Computer Science");
        assert_eq!(display_subject_name("lab_work"), "Lab_Work");
    }

    #[test]
    fn title_case_handles_separator_runs() {
        assert_eq!(title_case(""), "");
        assert_eq!(title_case("a"), "A");
        assert_eq!(title_case("one  two"), "One  Two");
    }

    // ---- filename ----

    #[test]
    fn filename_follows_class_and_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(diary_filename("5", date), "diary_5_2024_03_15.pdf");
    }

    #[test]
    fn filename_replaces_spaces_with_underscores() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        assert_eq!(
            diary_filename("Grade 5", date),
            "diary_Grade_5_2025_01_02.pdf"
        );
    }

    #[test]
    fn filename_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(diary_filename("7", date), diary_filename("7", date));
    }

    // ---- layout assembly ----

    #[test]
    fn spec_scenario_full_record() {
        let mut rec = record((2024, 3, 15));
        rec.section = Some("B".to_string());
        rec.teacher = Some("Ms. Khan".to_string());
        rec.subjects = vec![
            ("math".to_string(), "Page 12 Q1-5".to_string()),
            ("english".to_string(), String::new()),
        ];

        assert_eq!(
            diary_filename(&rec.class_label, rec.date),
            "diary_5_2024_03_15.pdf"
        );

        let blocks = assemble_blocks(&rec);
        let info = info_table(&blocks);
        assert_eq!(info.rows[0][0], "Date:");
        assert_eq!(info.rows[0][1], "Friday, March 15, 2024");
        assert_eq!(info.rows[0][3], "5 - Section B");
        assert_eq!(info.rows.len(), 2);
        assert_eq!(info.rows[1][1], "Ms. Khan");

        let subjects = subject_table(&blocks);
        assert_eq!(subjects.rows.len(), 1);
        assert_eq!(subjects.rows[0], vec!["Mathematics", "Page 12 Q1-5"]);

        assert!(!has_notes_table(&blocks));
    }

    #[test]
    fn all_empty_record_gets_fallback_row() {
        let mut rec = record((2024, 5, 1));
        rec.subjects = vec![
            ("math".to_string(), String::new()),
            ("urdu".to_string(), "   ".to_string()),
        ];
        let blocks = assemble_blocks(&rec);
        let subjects = subject_table(&blocks);
        assert_eq!(subjects.rows.len(), 1);
        assert_eq!(
            subjects.rows[0],
            vec!["No entries", "No homework assigned for today"]
        );
    }

    #[test]
    fn subject_table_always_has_a_data_row() {
        let rec = record((2023, 9, 4));
        let blocks = assemble_blocks(&rec);
        assert!(!subject_table(&blocks).rows.is_empty());
    }

    #[test]
    fn subject_rows_keep_entry_order() {
        let mut rec = record((2024, 5, 1));
        rec.subjects = vec![
            ("urdu".to_string(), "Sabaq 4".to_string()),
            ("math".to_string(), "Ex 2.1".to_string()),
            ("chemistry".to_string(), "Ch.3 review".to_string()),
        ];
        let blocks = assemble_blocks(&rec);
        let subjects = subject_table(&blocks);
        assert_eq!(subjects.rows.len(), 3);
        assert_eq!(subjects.rows[0][0], "Urdu");
        assert_eq!(subjects.rows[1][0], "Mathematics");
        assert_eq!(subjects.rows[2], vec!["Chemistry", "Ch.3 review"]);
    }

    #[test]
    fn teacher_row_only_when_name_present() {
        let mut rec = record((2024, 5, 1));
        assert_eq!(info_table(&assemble_blocks(&rec)).rows.len(), 1);

        rec.teacher = Some("   ".to_string());
        assert_eq!(info_table(&assemble_blocks(&rec)).rows.len(), 1);

        rec.teacher = Some("Mr. Ahmed".to_string());
        let blocks = assemble_blocks(&rec);
        let info = info_table(&blocks);
        assert_eq!(info.rows.len(), 2);
        assert_eq!(info.rows[1][0], "Teacher:");
    }

    #[test]
    fn section_suffix_only_when_present() {
        let mut rec = record((2024, 5, 1));
        assert_eq!(info_table(&assemble_blocks(&rec)).rows[0][3], "5");

        rec.section = Some(String::new());
        assert_eq!(info_table(&assemble_blocks(&rec)).rows[0][3], "5");

        rec.section = Some("A".to_string());
        assert_eq!(
            info_table(&assemble_blocks(&rec)).rows[0][3],
            "5 - Section A"
        );
    }

    #[test]
    fn notes_table_iff_notes_nonblank() {
        let mut rec = record((2024, 5, 1));
        assert!(!has_notes_table(&assemble_blocks(&rec)));

        rec.notes = Some("  \n ".to_string());
        assert!(!has_notes_table(&assemble_blocks(&rec)));

        rec.notes = Some("PTM on Friday".to_string());
        let blocks = assemble_blocks(&rec);
        assert!(has_notes_table(&blocks));
        let notes = blocks
            .iter()
            .find_map(|b| match b {
                Block::Table(t) if t.kind == TableKind::Notes => Some(t),
                _ => None,
            })
            .expect("notes table missing");
        assert_eq!(
            notes.rows[0],
            vec!["Additional Information", "PTM on Friday"]
        );
    }

    #[test]
    fn subject_text_is_sanitized_and_trimmed() {
        let mut rec = record((2024, 5, 1));
        rec.subjects = vec![(
            "math".to_string(),
            "  Ex 1 \u{2014} Q1\u{2013}5 \u{1F600} ".to_string(),
        )];
        let blocks = assemble_blocks(&rec);
        assert_eq!(subject_table(&blocks).rows[0][1], "Ex 1 - Q1-5 ?");
    }

    // ---- helpers ----

    #[test]
    fn parse_date_accepts_iso_and_rejects_garbage() {
        assert_eq!(
            parse_date(&Some("2024-03-15".to_string())).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
        );
        assert!(parse_date(&Some("not-a-date".to_string())).is_err());
        assert!(parse_date(&None).is_ok());
    }

    #[test]
    fn parse_subject_arg_splits_on_first_equals() {
        assert_eq!(
            parse_subject_arg("math=Ex 2.1 = harder").unwrap(),
            ("math".to_string(), "Ex 2.1 = harder".to_string())
        );
        assert_eq!(parse_subject_arg("Math=x").unwrap().0, "math".to_string());
        assert!(parse_subject_arg("no-equals-here").is_err());
    }

    #[test]
    fn generation_timestamp_never_panics() {
        let stamp = generation_timestamp();
        assert!(stamp.contains(" at "));
    }

    // ---- wrapping ----

    #[test]
    fn wrap_short_text_is_single_line() {
        let lines = wrap_text("Page 12", 110.0, BODY_FONT_SIZE);
        assert_eq!(lines, vec!["Page 12"]);
    }

    #[test]
    fn wrap_splits_at_word_boundaries() {
        let text = "Solve all exercise questions from chapter three and revise the previous test";
        let lines = wrap_text(text, 40.0, BODY_FONT_SIZE);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(text_width_mm(line, BODY_FONT_SIZE) <= 41.0);
        }
        assert_eq!(lines.join(" "), text);
    }

    #[test]
    fn wrap_hard_splits_overlong_words() {
        let word = "a".repeat(200);
        let lines = wrap_text(&word, 30.0, BODY_FONT_SIZE);
        assert!(lines.len() > 1);
        assert_eq!(lines.concat(), word);
    }

    #[test]
    fn wrap_empty_text_gives_one_empty_line() {
        assert_eq!(wrap_text("", 50.0, BODY_FONT_SIZE), vec![String::new()]);
        assert_eq!(wrap_text("   ", 50.0, BODY_FONT_SIZE), vec![String::new()]);
    }
}
