use crate::storage::ApplicationRecord;

pub struct ReminderEmail {
    pub subject: String,
    pub html: String,
}

/// 截止提醒邮件模板
pub fn render(record: &ApplicationRecord, dashboard_url: &str) -> ReminderEmail {
    let subject = format!("Upcoming deadline: {} application", record.school_name);
    let deadline = record.deadline.format("%B %-d, %Y").to_string();

    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; color: #333; line-height: 1.6;">
<p>Hello,</p>
<p>This is a reminder that the application deadline for <strong>{program}</strong> at <strong>{school}</strong> is <strong>{deadline}</strong>.</p>
<p>Review your documents and application status on your <a href="{dashboard}">GradTrack dashboard</a>.</p>
<p>Good luck!<br>The GradTrack Team</p>
</div>"#,
        program = html_escape(&record.program_name),
        school = html_escape(&record.school_name),
        deadline = deadline,
        dashboard = html_escape(dashboard_url),
    );

    ReminderEmail { subject, html }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
     .replace('<', "&lt;")
     .replace('>', "&gt;")
     .replace('"', "&quot;")
}
