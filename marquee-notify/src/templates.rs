use marquee_core::models::TicketContext;

pub const TICKET_SUBJECT: &str = "Your Ticket Is Ready";
pub const VERIFICATION_SUBJECT: &str = "Your Verification Code";

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn ticket_email(ctx: &TicketContext) -> String {
    let screening = &ctx.screening;
    let seats: String = ctx
        .tickets
        .iter()
        .map(|t| format!("<li>Seat <strong>{}</strong></li>", escape(&t.seat_code)))
        .collect();

    format!(
        r#"<html>
<body style="font-family: sans-serif;">
  <h2>Hi {name},</h2>
  <p>Your payment went through. Here are your tickets for <strong>{title}</strong>.</p>
  <table>
    <tr><td>Cinema</td><td>{cinema}</td></tr>
    <tr><td>Studio</td><td>{studio}</td></tr>
    <tr><td>Showtime</td><td>{start}</td></tr>
    <tr><td>Booking</td><td>#{booking}</td></tr>
  </table>
  <ul>{seats}</ul>
  <p>Each attached QR code admits one guest. Show it at the entrance.</p>
</body>
</html>"#,
        name = escape(&ctx.recipient.name),
        title = escape(&screening.movie_title),
        cinema = escape(&screening.cinema_name),
        studio = escape(&screening.studio_name),
        start = screening.start_time.format("%A, %d %B %Y %H:%M UTC"),
        booking = ctx.booking_id,
        seats = seats,
    )
}

pub fn verification_email(name: &str, code: &str) -> String {
    format!(
        r#"<html>
<body style="font-family: sans-serif;">
  <h2>Hi {name},</h2>
  <p>Use this code to verify your account:</p>
  <p style="font-size: 28px; letter-spacing: 6px;"><strong>{code}</strong></p>
  <p>If you did not request it, ignore this email.</p>
</body>
</html>"#,
        name = escape(name),
        code = escape(code),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use marquee_core::models::{IssuedTicket, Recipient, ScreeningDetails};
    use uuid::Uuid;

    #[test]
    fn test_ticket_email_lists_seats_and_escapes() {
        let ctx = TicketContext {
            booking_id: 42,
            recipient: Recipient {
                user_id: 1,
                name: "Jane <script>".to_string(),
                email: "jane@example.com".to_string(),
            },
            screening: ScreeningDetails {
                screening_id: 9,
                movie_title: "Tom & Jerry".to_string(),
                cinema_name: "Marquee Central".to_string(),
                studio_name: "Studio 3".to_string(),
                start_time: Utc.with_ymd_and_hms(2026, 3, 14, 19, 30, 0).unwrap(),
            },
            tickets: vec![
                IssuedTicket { seat_code: "A1".to_string(), qr_token: Uuid::new_v4() },
                IssuedTicket { seat_code: "A2".to_string(), qr_token: Uuid::new_v4() },
            ],
        };

        let html = ticket_email(&ctx);
        assert!(html.contains("Jane &lt;script&gt;"));
        assert!(html.contains("Tom &amp; Jerry"));
        assert!(html.contains("Seat <strong>A1</strong>"));
        assert!(html.contains("Seat <strong>A2</strong>"));
        assert!(html.contains("Saturday, 14 March 2026 19:30 UTC"));
    }

    #[test]
    fn test_verification_email_shows_code() {
        let html = verification_email("Jane", "042917");
        assert!(html.contains("<strong>042917</strong>"));
    }
}
