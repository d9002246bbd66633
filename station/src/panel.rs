use weather_common::{sink::CO2_ALERT_PPM, Page, RenderLock, Widgets};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub page: Page,
    pub revision: u64,
    pub lines: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PanelRenderer {
    seen_revision: Option<u64>,
}

impl PanelRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self, ui: &RenderLock) -> Option<Frame> {
        let widgets = match self.seen_revision {
            Some(revision) => ui.changed_since(revision)?,
            None => ui.snapshot(),
        };
        self.seen_revision = Some(widgets.revision);
        Some(compose(&widgets))
    }
}

pub fn compose(widgets: &Widgets) -> Frame {
    let lines = match widgets.page {
        Page::Outdoor => vec![
            "Outdoor".to_string(),
            widgets.outdoor_temp.clone(),
            widgets.outdoor_humidity.clone(),
            widgets.outdoor_pressure.clone(),
        ],
        Page::Weather => vec![
            widgets.api_city.clone(),
            widgets.api_temp.clone(),
            widgets.api_description.clone(),
        ],
        Page::Indoor => {
            let mut lines: Vec<String> = widgets
                .rooms
                .iter()
                .map(|room| {
                    let marker = if room.co2_alert { " (!)" } else { "" };
                    format!("{}: {}{} {}", room.name, room.co2, marker, room.temperature)
                })
                .collect();
            lines.push(format!("(!) CO2 above {CO2_ALERT_PPM} ppm"));
            lines
        }
    };

    Frame {
        page: widgets.page,
        revision: widgets.revision,
        lines,
    }
}
