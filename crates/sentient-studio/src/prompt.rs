//! Prompt text sent to the generative models.

use sentient_weather::CurrentConditions;

/// Designer prompt asking for a three-colour palette as bare JSON.
pub fn palette_prompt(subject: &str, conditions: &CurrentConditions, descriptor: &str) -> String {
    format!(
        "You are a leading visual designer. Your goal is to design attractive, vibrant colour \
palettes for a weather app. Each colour palette is inspired by the unique atmosphere of a city \
and its current weather conditions, and follows the 60-30-10 rule: the dominant colour covers \
60% of the design, the secondary colour 30% and the accent colour 10%.

The city and current weather conditions are:
- location: {subject}
- weather description: {descriptor}
- current temperature: {temperature} °C
- current precipitation: {precipitation} mm
- current cloud cover: {cloud_cover} %
- current wind speed: {wind_speed} km/h
- is it day or night: {is_day} (0 is night, 1 is day)

Requirements:
- The output must be valid JSON
- Use ONLY the following keys: dominant_color, secondary_color, accent_color
- Each key should get a hex color code
- Do not include any explanation or other text
- Each value should be of type string",
        temperature = conditions.temperature,
        precipitation = conditions.precipitation,
        cloud_cover = conditions.cloud_cover,
        wind_speed = conditions.wind_speed,
        is_day = u8::from(conditions.is_day),
    )
}

pub fn image_prompt(subject: &str, descriptor: &str) -> String {
    format!(
        "An oil painting of the most iconic scenery from {} where the weather is {}.",
        subject, descriptor
    )
}
