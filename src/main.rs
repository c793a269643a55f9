use gtk::glib::Type as GlibType;
use gtk::{gdk, glib, prelude::*};
use gtk::{Application, ApplicationWindow, Box as GtkBox, Button, Frame, Label, Orientation, ProgressBar};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::warn;

mod backend;
mod docx;
mod error;

enum WorkerMsg {
    Progress(usize, usize),
    Done(PathBuf),
    Failed(String),
}

fn main() -> glib::ExitCode {
    tracing_subscriber::fmt::init();
    let app = Application::builder()
        .application_id("com.github.pdf2docx.converter")
        .build();
    app.connect_activate(build_ui);
    app.run()
}

fn build_ui(app: &Application) {
    let css = r#"
    .root { background-color: #f7f9fb; }
    .card { background-color: #dee5ec; border-radius: 8px; padding: 10px; }
    .action-button { font-weight: 600; padding: 10px 14px; border-radius: 6px; }
    .status { color: #555555; }
    "#;
    let provider = gtk::CssProvider::new();
    provider.load_from_data(css);
    if let Some(display) = gdk::Display::default() {
        gtk::style_context_add_provider_for_display(
            &display,
            &provider,
            gtk::STYLE_PROVIDER_PRIORITY_APPLICATION,
        );
    }

    let vbox = GtkBox::builder()
        .orientation(Orientation::Vertical)
        .spacing(12)
        .margin_top(20)
        .margin_bottom(20)
        .margin_start(20)
        .margin_end(20)
        .build();
    vbox.add_css_class("root");

    let title = Label::builder().label("PDF to DOCX Converter").build();
    title.add_css_class("title-2");
    vbox.append(&title);

    // Drop area: a framed label that doubles as the selected-file display
    let drop_frame = Frame::new(None);
    drop_frame.set_size_request(460, 120);
    let drop_label = Label::builder()
        .label("📄 Drop your PDF file here")
        .wrap(true)
        .build();
    drop_frame.set_child(Some(&drop_label));
    drop_frame.add_css_class("card");
    vbox.append(&drop_frame);

    let select_folder_btn = Button::with_label("📂 Select output folder");
    select_folder_btn.add_css_class("action-button");
    vbox.append(&select_folder_btn);

    let folder_label = Label::builder()
        .label("No folder selected")
        .wrap(true)
        .build();
    folder_label.add_css_class("status");
    vbox.append(&folder_label);

    let convert_btn = Button::with_label("🚀 Convert");
    convert_btn.add_css_class("action-button");
    convert_btn.set_sensitive(false);
    vbox.append(&convert_btn);

    let progress_bar = ProgressBar::new();
    progress_bar.set_visible(false);
    vbox.append(&progress_bar);

    let status_label = Label::new(None);
    status_label.add_css_class("status");
    vbox.append(&status_label);

    let window = ApplicationWindow::builder()
        .application(app)
        .title("PDF → DOCX Converter")
        .default_width(520)
        .default_height(420)
        .child(&vbox)
        .build();

    let pdf_path: Rc<RefCell<Option<PathBuf>>> = Rc::new(RefCell::new(None));
    let output_folder: Rc<RefCell<Option<PathBuf>>> = Rc::new(RefCell::new(None));

    // Convert stays disabled until both the source file and the folder are set
    let update_convert_state: Rc<dyn Fn()> = {
        let pdf_path = pdf_path.clone();
        let output_folder = output_folder.clone();
        let convert_btn = convert_btn.clone();
        Rc::new(move || {
            let ready = pdf_path.borrow().is_some() && output_folder.borrow().is_some();
            convert_btn.set_sensitive(ready);
        })
    };

    let drop_target = gtk::DropTarget::new(GlibType::STRING, gdk::DragAction::COPY);
    {
        let pdf_path = pdf_path.clone();
        let drop_label = drop_label.clone();
        let window = window.clone();
        let update_convert_state = update_convert_state.clone();
        drop_target.connect_drop(move |_, value, _, _| {
            let Ok(uris) = value.get::<String>() else {
                return false;
            };
            let Some(path) = first_dropped_path(&uris) else {
                return false;
            };
            if !path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
            {
                warn!(path = %path.display(), "rejected drop, not a PDF");
                show_message(&window, "Please drop a PDF file.");
                return false;
            }
            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_string();
            drop_label.set_label(&format!("📄 {name}"));
            pdf_path.borrow_mut().replace(path);
            update_convert_state();
            true
        });
    }
    drop_frame.add_controller(drop_target);

    {
        let output_folder = output_folder.clone();
        let folder_label = folder_label.clone();
        let update_convert_state = update_convert_state.clone();
        select_folder_btn.connect_clicked(move |_| {
            if let Ok(out) = std::process::Command::new("zenity")
                .arg("--file-selection")
                .arg("--directory")
                .output()
            {
                if out.status.success() {
                    let path = String::from_utf8_lossy(&out.stdout).trim().to_string();
                    if !path.is_empty() {
                        folder_label.set_label(&format!("📁 {path}"));
                        output_folder.borrow_mut().replace(PathBuf::from(path));
                        update_convert_state();
                    }
                }
            }
        });
    }

    let convert_btn_for_click = convert_btn.clone();
    let select_folder_btn_for_run = select_folder_btn.clone();
    let window_for_run = window.clone();
    let progress_bar_for_run = progress_bar.clone();
    let status_label_for_run = status_label.clone();
    convert_btn_for_click.connect_clicked(move |btn| {
        let (source, dest) = match (pdf_path.borrow().clone(), output_folder.borrow().clone()) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                show_message(
                    &window_for_run,
                    "Please select a PDF file and a destination folder.",
                );
                return;
            }
        };

        btn.set_sensitive(false);
        select_folder_btn_for_run.set_sensitive(false);
        progress_bar_for_run.set_fraction(0.0);
        progress_bar_for_run.set_visible(true);
        status_label_for_run.set_label("🔄 Converting…");

        let (sender, receiver) = glib::MainContext::channel::<WorkerMsg>(glib::Priority::DEFAULT);

        let progress_sender = sender.clone();
        std::thread::spawn(move || {
            let result = backend::convert_to_docx(&source, &dest, |done, total| {
                let _ = progress_sender.send(WorkerMsg::Progress(done, total));
            });
            let _ = match result {
                Ok(path) => sender.send(WorkerMsg::Done(path)),
                Err(e) => sender.send(WorkerMsg::Failed(e.to_string())),
            };
        });

        let select_folder_btn = select_folder_btn_for_run.clone();
        let progress_bar = progress_bar_for_run.clone();
        let status_label = status_label_for_run.clone();
        let window = window_for_run.clone();
        let update_convert_state = update_convert_state.clone();
        receiver.attach(None, move |msg| match msg {
            WorkerMsg::Progress(done, total) => {
                progress_bar.set_fraction(done as f64 / total as f64);
                status_label.set_label(&format!("🔄 Converting page {done} of {total}"));
                glib::ControlFlow::Continue
            }
            WorkerMsg::Done(path) => {
                status_label.set_label("✅ Conversion finished");
                progress_bar.set_visible(false);
                select_folder_btn.set_sensitive(true);
                update_convert_state();
                show_message(
                    &window,
                    &format!("Conversion finished:\n{}", path.display()),
                );
                glib::ControlFlow::Break
            }
            WorkerMsg::Failed(message) => {
                status_label.set_label("❌ Conversion failed");
                progress_bar.set_visible(false);
                select_folder_btn.set_sensitive(true);
                update_convert_state();
                show_message(
                    &window,
                    &format!("An error occurred during conversion:\n{message}"),
                );
                glib::ControlFlow::Break
            }
        });
    });

    window.present();
}

/// First usable filesystem path out of a dropped URI list.
fn first_dropped_path(uris: &str) -> Option<PathBuf> {
    for raw in uris.split('\n') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        if raw.starts_with("file://") {
            if let Ok((path, _)) = glib::filename_from_uri(raw) {
                return Some(path);
            }
        }
        return Some(PathBuf::from(raw));
    }
    None
}

fn show_message(window: &ApplicationWindow, text: &str) {
    let dialog = gtk::MessageDialog::builder()
        .transient_for(window)
        .modal(true)
        .text(text)
        .build();
    dialog.add_button("OK", gtk::ResponseType::Ok);
    dialog.connect_response(|d, _| d.close());
    dialog.show();
}
